//! Change notifications published by the context store.
//!
//! Every mutation (and every successful read, which counts as attention for
//! prioritization) produces one `ContextEvent`. Subscribers receive them over
//! a broadcast channel and decide for themselves what to react to.

use crate::{ContextEntry, DeviceId, Timestamp};
use serde::{Deserialize, Serialize};

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new entry was inserted.
    Added,
    /// An existing entry changed.
    Updated,
    /// An entry was removed on request.
    Removed,
    /// An entry was dropped because its expiry passed.
    Expired,
    /// An entry was dropped by the size-cap eviction pass.
    Evicted,
    /// An entry was read.
    Requested,
}

impl ChangeKind {
    /// Returns true for kinds that leave the entry in the store.
    #[must_use]
    pub fn is_upsert(&self) -> bool {
        matches!(self, Self::Added | Self::Updated)
    }

    /// Returns true for kinds that take the entry out of the store.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Removed | Self::Expired | Self::Evicted)
    }
}

/// Who caused a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "device", rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A local producer, or the store's own maintenance.
    #[default]
    Local,
    /// A sync session with the given device.
    Sync(DeviceId),
}

impl ChangeOrigin {
    /// Returns true if the change arrived through sync.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The entry after the change, or the removed entry for removals.
    pub entry: ContextEntry,
    /// Who caused it.
    pub origin: ChangeOrigin,
    /// When the event was published.
    pub timestamp: Timestamp,
}

impl ContextEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: ChangeKind, entry: ContextEntry, origin: ChangeOrigin) -> Self {
        Self {
            kind,
            entry,
            origin,
            timestamp: Timestamp::now(),
        }
    }

    /// Shorthand for the entry's context type.
    #[must_use]
    pub fn context_type(&self) -> &str {
        &self.entry.context_type
    }
}
