//! Per-device offline queues.
//!
//! Each device has one bounded queue. On overflow the oldest change is
//! dropped. Inbound changes were authored by the device and are replayed as
//! incoming on its next session; outbound changes are waiting to be
//! delivered to it.

use crate::change::SyncChange;
use contextmesh_types::{ContextId, DeviceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Which way a queued change travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDirection {
    /// Authored by the device, waiting to be applied here.
    Inbound,
    /// Destined for the device.
    Outbound,
}

/// A change waiting in an offline queue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueuedChange {
    pub(crate) direction: QueueDirection,
    pub(crate) change: SyncChange,
}

/// Selects queued changes. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineFilter {
    pub direction: Option<QueueDirection>,
    /// Inclusive lower bound on the change timestamp.
    pub since: Option<Timestamp>,
    /// Inclusive upper bound on the change timestamp.
    pub until: Option<Timestamp>,
    pub context_type: Option<String>,
    pub ids: Option<Vec<ContextId>>,
}

impl OfflineFilter {
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn direction(mut self, direction: QueueDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    #[must_use]
    pub fn of_type(mut self, context_type: impl Into<String>) -> Self {
        self.context_type = Some(context_type.into());
        self
    }

    #[must_use]
    pub fn between(mut self, since: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    #[must_use]
    pub fn ids(mut self, ids: Vec<ContextId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub(crate) fn matches(&self, queued: &QueuedChange) -> bool {
        let change = &queued.change;
        self.direction.is_none_or(|d| d == queued.direction)
            && self.since.is_none_or(|since| change.timestamp >= since)
            && self.until.is_none_or(|until| change.timestamp <= until)
            && self
                .context_type
                .as_ref()
                .is_none_or(|t| *t == change.context_type)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&change.id))
    }
}

/// All offline queues. Guarded by the service's offline lock.
#[derive(Debug)]
pub(crate) struct OfflineQueues {
    capacity: usize,
    queues: HashMap<DeviceId, VecDeque<QueuedChange>>,
}

impl OfflineQueues {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: HashMap::new(),
        }
    }

    /// Appends changes; returns the resulting queue length.
    pub(crate) fn push(
        &mut self,
        device: &DeviceId,
        direction: QueueDirection,
        changes: impl IntoIterator<Item = SyncChange>,
    ) -> usize {
        let queue = self.queues.entry(device.clone()).or_default();
        let mut dropped = 0usize;
        for change in changes {
            if queue.len() == self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(QueuedChange { direction, change });
        }
        if dropped > 0 {
            warn!("Offline queue for {device} full, dropped {dropped} oldest changes");
        }
        queue.len()
    }

    pub(crate) fn len(&self, device: &DeviceId) -> usize {
        self.queues.get(device).map_or(0, VecDeque::len)
    }

    pub(crate) fn get(&self, device: &DeviceId, filter: &OfflineFilter) -> Vec<SyncChange> {
        self.queues
            .get(device)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|q| filter.matches(q))
                    .map(|q| q.change.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes and returns every change travelling in `direction`, oldest
    /// first.
    pub(crate) fn drain(&mut self, device: &DeviceId, direction: QueueDirection) -> Vec<SyncChange> {
        let Some(queue) = self.queues.get_mut(device) else {
            return Vec::new();
        };
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|q| q.direction == direction);
        *queue = kept;
        if queue.is_empty() {
            self.queues.remove(device);
        }
        taken.into_iter().map(|q| q.change).collect()
    }

    /// Drops a device's queue; returns how many changes it held.
    pub(crate) fn clear(&mut self, device: &DeviceId) -> usize {
        self.queues.remove(device).map_or(0, |q| q.len())
    }

    /// Devices with queued inbound changes.
    pub(crate) fn devices_with_inbound(&self) -> Vec<DeviceId> {
        self.queues
            .iter()
            .filter(|(_, queue)| queue.iter().any(|q| q.direction == QueueDirection::Inbound))
            .map(|(device, _)| device.clone())
            .collect()
    }
}
