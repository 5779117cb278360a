//! The sync service.
//!
//! Each concern has its own lock: `device_lock` for the registry,
//! `strategy_lock` for conflict strategies, `offline_lock` for the offline
//! queues and `history_lock` for the session ring. No two of them are held
//! at once, and none is held across a store call or a policy check.

use crate::change::{
    ChangeOutcome, ChangeStatus, ConflictResolution, ResolutionAction, SyncChange, SyncOptions,
    SyncRequest, SyncResponse, SyncStats,
};
use crate::config::SyncServiceConfig;
use crate::conflict::{
    ClientWins, Conflict, ConflictStrategy, LastWriteWins, MergeStrategy, ServerWins,
};
use crate::device::{DeviceRecord, DeviceRegistration, DeviceStatus};
use crate::error::{SyncError, SyncResult};
use crate::offline::{OfflineFilter, OfflineQueues, QueueDirection};
use crate::policy::{AccessOperation, AccessPolicy};
use contextmesh_store::{ContextStore, TaskHandle, UpdateOptions};
use contextmesh_types::{
    ChangeOrigin, ContextEvent, ContextId, ContextUpdate, DeviceId, Timestamp,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// One finished session, kept in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub device: DeviceId,
    pub strategy: String,
    pub stats: SyncStats,
    pub timestamp: Timestamp,
}

/// A device and the size of its offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusReport {
    pub device: DeviceRecord,
    pub queued_changes: usize,
}

/// Snapshot returned by `get_sync_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub devices: Vec<DeviceStatusReport>,
    pub active_syncs: usize,
    /// Sessions, oldest first.
    pub history: Vec<SyncRecord>,
    /// Registered strategy names, sorted.
    pub strategies: Vec<String>,
}

/// What one background pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundReport {
    pub marked_offline: usize,
    pub devices_flushed: usize,
    pub changes_applied: usize,
}

enum Incoming {
    Applied(Value),
    Duplicate,
}

struct ActiveSync<'a>(&'a AtomicUsize);

impl<'a> ActiveSync<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveSync<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registers devices and runs sync sessions against a store.
pub struct SyncService {
    config: SyncServiceConfig,
    store: Arc<ContextStore>,
    policy: Arc<dyn AccessPolicy>,
    device_lock: RwLock<HashMap<DeviceId, DeviceRecord>>,
    strategy_lock: RwLock<HashMap<String, Arc<dyn ConflictStrategy>>>,
    offline_lock: Mutex<OfflineQueues>,
    history_lock: Mutex<VecDeque<SyncRecord>>,
    permits: Semaphore,
    active_syncs: AtomicUsize,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("config", &self.config)
            .field("active_syncs", &self.active_syncs.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Creates a service with the built-in conflict strategies registered.
    pub fn new(
        config: SyncServiceConfig,
        store: Arc<ContextStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let builtins: [Arc<dyn ConflictStrategy>; 4] = [
            Arc::new(LastWriteWins),
            Arc::new(ServerWins),
            Arc::new(ClientWins),
            Arc::new(MergeStrategy::new(Arc::clone(&store))),
        ];
        let strategies = builtins
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect::<HashMap<_, _>>();
        if !strategies.contains_key(&config.default_strategy) {
            return Err(SyncError::UnknownStrategy(config.default_strategy.clone()));
        }

        Ok(Self {
            offline_lock: Mutex::new(OfflineQueues::new(config.max_offline_queue)),
            history_lock: Mutex::new(VecDeque::with_capacity(config.history_size)),
            permits: Semaphore::new(config.max_concurrent_syncs),
            active_syncs: AtomicUsize::new(0),
            device_lock: RwLock::new(HashMap::new()),
            strategy_lock: RwLock::new(strategies),
            config,
            store,
            policy,
        })
    }

    pub fn config(&self) -> &SyncServiceConfig {
        &self.config
    }

    // ---- device registry ----

    /// Registers a device, or merges the registration into a known one.
    pub async fn register_device(&self, registration: DeviceRegistration) -> DeviceRecord {
        let now = Timestamp::now();
        let mut devices = self.device_lock.write().await;
        match devices.get_mut(&registration.id) {
            Some(record) => {
                record.merge(registration, now);
                debug!("Updated device {} ({} updates)", record.id, record.update_count);
                record.clone()
            }
            None => {
                let record = DeviceRecord::register(registration, now);
                info!("Registered device {} ({})", record.id, record.name);
                devices.insert(record.id.clone(), record.clone());
                record
            }
        }
    }

    /// Removes a device and its offline queue.
    pub async fn unregister_device(&self, device: &DeviceId) -> Option<DeviceRecord> {
        let removed = self.device_lock.write().await.remove(device);
        if removed.is_some() {
            let dropped = self.offline_lock.lock().await.clear(device);
            info!("Unregistered device {device} ({dropped} queued changes dropped)");
        }
        removed
    }

    pub async fn device(&self, device: &DeviceId) -> Option<DeviceRecord> {
        self.device_lock.read().await.get(device).cloned()
    }

    /// All devices, sorted by id.
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> =
            self.device_lock.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Marks a device as seen now and active.
    pub async fn heartbeat(&self, device: &DeviceId) -> SyncResult<()> {
        let mut devices = self.device_lock.write().await;
        let record = devices
            .get_mut(device)
            .ok_or_else(|| SyncError::DeviceNotFound(device.clone()))?;
        record.last_seen = Timestamp::now();
        record.status = DeviceStatus::Active;
        Ok(())
    }

    pub async fn set_device_status(&self, device: &DeviceId, status: DeviceStatus) -> SyncResult<()> {
        let mut devices = self.device_lock.write().await;
        let record = devices
            .get_mut(device)
            .ok_or_else(|| SyncError::DeviceNotFound(device.clone()))?;
        if record.status != status {
            debug!("Device {device} is now {status:?}");
            record.status = status;
        }
        Ok(())
    }

    // ---- strategies ----

    /// Registers (or replaces) a named conflict strategy.
    pub async fn register_conflict_resolution_strategy(
        &self,
        name: impl Into<String>,
        strategy: Arc<dyn ConflictStrategy>,
    ) -> SyncResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SyncError::Config("strategy name must not be empty".to_string()));
        }
        if self
            .strategy_lock
            .write()
            .await
            .insert(name.clone(), strategy)
            .is_some()
        {
            info!("Replaced conflict strategy {name}");
        }
        Ok(())
    }

    async fn strategy(&self, name: &str) -> SyncResult<Arc<dyn ConflictStrategy>> {
        self.strategy_lock
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownStrategy(name.to_string()))
    }

    // ---- sessions ----

    /// Runs one sync session with a registered device.
    ///
    /// Incoming changes (queued ones first) are applied one by one and never
    /// abort the session. Outgoing changes are the latest entry per candidate
    /// type not authored by the device plus anything queued for it, with at
    /// most one change per id (the newest). Every outgoing change whose type
    /// was also written by this session with a different timestamp goes
    /// through the conflict strategy.
    pub async fn synchronize(
        &self,
        device: &DeviceId,
        request: SyncRequest,
        options: SyncOptions,
    ) -> SyncResult<SyncResponse> {
        let clock = Instant::now();
        let strategy_name = options
            .conflict_strategy
            .clone()
            .unwrap_or_else(|| self.config.default_strategy.clone());
        let strategy = self.strategy(&strategy_name).await?;
        let record = self
            .device(device)
            .await
            .ok_or_else(|| SyncError::DeviceNotFound(device.clone()))?;

        let _permit = self.permits.acquire().await.map_err(|_| SyncError::Closed)?;
        let _active = ActiveSync::enter(&self.active_syncs);
        let mut stats = SyncStats::default();

        // incoming
        let replayed = self
            .offline_lock
            .lock()
            .await
            .drain(device, QueueDirection::Inbound);
        let incoming: Vec<SyncChange> = replayed.into_iter().chain(request.changes).collect();
        stats.incoming = incoming.len();

        let mut outcomes = Vec::with_capacity(incoming.len());
        let mut applied: HashMap<String, (SyncChange, Value)> = HashMap::new();
        for change in incoming {
            let result = match self.apply_incoming(device, &change).await {
                Ok(Incoming::Applied(data)) => {
                    stats.applied += 1;
                    let newer = applied
                        .get(&change.context_type)
                        .is_none_or(|(seen, _)| change.timestamp >= seen.timestamp);
                    let outcome = change_outcome(&change, ChangeStatus::Applied, None);
                    if newer {
                        applied.insert(change.context_type.clone(), (change, data));
                    }
                    outcome
                }
                Ok(Incoming::Duplicate) => {
                    stats.duplicates += 1;
                    change_outcome(&change, ChangeStatus::Duplicate, None)
                }
                Err(e) => {
                    warn!("Incoming change {} from {} failed: {}", change.id, device, e);
                    stats.errors += 1;
                    change_outcome(&change, ChangeStatus::Error, Some(e.to_string()))
                }
            };
            outcomes.push(result);
        }

        // outgoing
        let since = request.last_sync_timestamp.or(record.last_sync);
        let compress = self.config.compression && record.capabilities.compression;
        let mut outgoing = Vec::new();
        for context_type in self.candidate_types(&record, options.context_types.as_deref()).await {
            if !self
                .policy
                .check(device, AccessOperation::Read, &context_type)
                .await
            {
                debug!("Skipping {context_type} for {device}: read denied");
                continue;
            }
            let Some(entry) = self
                .store
                .latest_of_type(&context_type, Some(device.as_str()))
                .await
            else {
                continue;
            };
            if !options.force_sync && since.is_some_and(|since| entry.timestamp <= since) {
                continue;
            }
            match SyncChange::from_entry(&entry, compress) {
                Ok(change) => outgoing.push(change),
                Err(e) => warn!("Could not encode {} for {}: {}", entry.id, device, e),
            }
        }

        let queued = self
            .offline_lock
            .lock()
            .await
            .drain(device, QueueDirection::Outbound);
        stats.offline_delivered = queued.len();
        let outgoing = newest_per_id(outgoing.into_iter().chain(queued));

        // conflicts
        let mut conflicts = Vec::new();
        let mut changes = Vec::with_capacity(outgoing.len());
        for change in outgoing {
            let Some((incoming, incoming_data)) = applied.get(&change.context_type) else {
                changes.push(change);
                continue;
            };
            if incoming.timestamp == change.timestamp {
                changes.push(change);
                continue;
            }
            let outgoing_data = match change.payload.decode() {
                Ok(data) => data,
                Err(e) => {
                    warn!("Could not decode outgoing {}: {}", change.id, e);
                    changes.push(change);
                    continue;
                }
            };
            let conflict = Conflict {
                device: device.clone(),
                context_type: change.context_type.clone(),
                incoming: incoming.clone(),
                incoming_data: incoming_data.clone(),
                outgoing: change,
                outgoing_data,
            };
            match strategy.resolve(&conflict).await {
                Ok(resolution) => {
                    debug!(
                        "Conflict on {} with {}: {:?} wins",
                        conflict.context_type, device, resolution.winner
                    );
                    conflicts.push(ConflictResolution {
                        context_type: conflict.context_type.clone(),
                        strategy: strategy_name.clone(),
                        winner: resolution.winner,
                        action: resolution.action,
                        timestamp: Timestamp::now(),
                    });
                    if resolution.action == ResolutionAction::KeepOutgoing {
                        changes.push(conflict.outgoing);
                    }
                }
                Err(e) => {
                    warn!(
                        "Strategy {} failed on {}: {}",
                        strategy_name, conflict.context_type, e
                    );
                    changes.push(conflict.outgoing);
                }
            }
        }

        stats.outgoing = changes.len();
        stats.conflicts = conflicts.len();
        stats.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        // bookkeeping
        let sync_timestamp = Timestamp::now();
        if let Some(record) = self.device_lock.write().await.get_mut(device) {
            record.last_sync = Some(sync_timestamp);
            record.last_seen = sync_timestamp;
            record.sync_count += 1;
            record.status = DeviceStatus::Active;
        }
        self.record_history(SyncRecord {
            device: device.clone(),
            strategy: strategy_name,
            stats,
            timestamp: sync_timestamp,
        })
        .await;

        info!(
            "Synced {}: {} in ({} applied), {} out, {} conflicts",
            device, stats.incoming, stats.applied, stats.outgoing, stats.conflicts
        );
        Ok(SyncResponse {
            device: device.clone(),
            changes,
            outcomes,
            conflicts,
            stats,
            sync_timestamp,
        })
    }

    async fn apply_incoming(&self, device: &DeviceId, change: &SyncChange) -> SyncResult<Incoming> {
        if !self
            .policy
            .check(device, AccessOperation::Write, &change.context_type)
            .await
        {
            return Err(SyncError::PolicyDenied {
                reason: format!("{device} may not write {}", change.context_type),
            });
        }
        let data = change.payload.decode()?;

        let now = Timestamp::now();
        if let Some(existing) = self.store.peek(&change.id).await {
            if !existing.is_expired_at(now)
                && existing.context_type == change.context_type
                && existing.timestamp >= change.timestamp
            {
                return Ok(Incoming::Duplicate);
            }
        }

        let update = ContextUpdate {
            source: Some(device.to_string()),
            context_type: Some(change.context_type.clone()),
            data: Some(data.clone()),
            timestamp: Some(change.timestamp),
            expiry_timestamp: self
                .store
                .config()
                .default_expiry()
                .map(|lifetime| change.timestamp.max(now).saturating_add(lifetime)),
            priority: change.metadata.priority,
            confidence: change.metadata.confidence,
            ..ContextUpdate::default()
        };
        self.store
            .update(
                &change.id,
                update,
                UpdateOptions::default()
                    .upsert()
                    .keep_timestamp()
                    .with_origin(ChangeOrigin::Sync(device.clone())),
            )
            .await?;
        Ok(Incoming::Applied(data))
    }

    /// Types to send, in sync order: explicit list as given; otherwise every
    /// stored type by device priority, then the configured list, then name.
    async fn candidate_types(&self, record: &DeviceRecord, explicit: Option<&[String]>) -> Vec<String> {
        if let Some(types) = explicit {
            return types.to_vec();
        }
        let configured = |t: &str| self.config.type_priorities.iter().position(|p| p == t);
        let mut types = self.store.context_types().await;
        types.sort_by(|a, b| {
            record
                .type_priority(b)
                .cmp(&record.type_priority(a))
                .then_with(|| match (configured(a), configured(b)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => CmpOrdering::Less,
                    (None, Some(_)) => CmpOrdering::Greater,
                    (None, None) => CmpOrdering::Equal,
                })
                .then_with(|| a.cmp(b))
        });
        types
    }

    async fn record_history(&self, record: SyncRecord) {
        if self.config.history_size == 0 {
            return;
        }
        let mut history = self.history_lock.lock().await;
        while history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(record);
    }

    // ---- offline queues ----

    /// Queues changes a device made while offline. They are applied on its
    /// next session or by the background pass. Returns the queue length.
    pub async fn queue_offline_changes(
        &self,
        device: &DeviceId,
        changes: Vec<SyncChange>,
    ) -> SyncResult<usize> {
        if self.device(device).await.is_none() {
            return Err(SyncError::DeviceNotFound(device.clone()));
        }
        let count = changes.len();
        let len = self
            .offline_lock
            .lock()
            .await
            .push(device, QueueDirection::Inbound, changes);
        debug!("Queued {count} offline changes from {device}");
        Ok(len)
    }

    /// Queued changes for a device, oldest first.
    pub async fn get_offline_changes(
        &self,
        device: &DeviceId,
        filter: &OfflineFilter,
    ) -> Vec<SyncChange> {
        self.offline_lock.lock().await.get(device, filter)
    }

    /// Empties a device's queue. Returns how many changes were dropped.
    pub async fn clear_offline_changes(&self, device: &DeviceId) -> usize {
        self.offline_lock.lock().await.clear(device)
    }

    /// Applies a device's queued inbound changes without a full session.
    async fn flush_inbound(&self, device: &DeviceId) -> usize {
        let queued = self
            .offline_lock
            .lock()
            .await
            .drain(device, QueueDirection::Inbound);
        let mut applied = 0;
        for change in queued {
            match self.apply_incoming(device, &change).await {
                Ok(Incoming::Applied(_)) => applied += 1,
                Ok(Incoming::Duplicate) => {}
                Err(e) => warn!("Queued change {} from {} failed: {}", change.id, device, e),
            }
        }
        applied
    }

    // ---- store events ----

    /// Queues local upserts for every offline device except the author.
    pub async fn observe(&self, event: &ContextEvent) {
        if !self.config.auto_enqueue || event.origin.is_sync() || !event.kind.is_upsert() {
            return;
        }
        let targets: Vec<(DeviceId, bool)> = self
            .device_lock
            .read()
            .await
            .values()
            .filter(|d| d.status == DeviceStatus::Offline && d.id.as_str() != event.entry.source)
            .map(|d| (d.id.clone(), d.capabilities.compression))
            .collect();

        for (device, accepts_compression) in targets {
            if !self
                .policy
                .check(&device, AccessOperation::Read, event.context_type())
                .await
            {
                continue;
            }
            let compress = self.config.compression && accepts_compression;
            let mut change = match SyncChange::from_entry(&event.entry, compress) {
                Ok(change) => change,
                Err(e) => {
                    warn!("Could not queue {} for {}: {}", event.entry.id, device, e);
                    continue;
                }
            };
            change.metadata.offline = true;
            self.offline_lock
                .lock()
                .await
                .push(&device, QueueDirection::Outbound, [change]);
        }
    }

    // ---- background ----

    /// Marks stale devices offline, then flushes queued inbound changes of
    /// active devices, at most `max_concurrent_syncs` devices at a time.
    pub async fn run_background_pass(&self) -> BackgroundReport {
        let mut report = BackgroundReport::default();
        let now = Timestamp::now();

        if let Some(after) = self.config.offline_after() {
            let mut devices = self.device_lock.write().await;
            for record in devices.values_mut() {
                if record.is_active() && now.duration_since(record.last_seen) > after {
                    record.status = DeviceStatus::Offline;
                    report.marked_offline += 1;
                    info!("Device {} went offline", record.id);
                }
            }
        }

        let pending = self.offline_lock.lock().await.devices_with_inbound();
        let ready: Vec<DeviceId> = {
            let devices = self.device_lock.read().await;
            pending
                .into_iter()
                .filter(|d| devices.get(d).is_some_and(DeviceRecord::is_active))
                .collect()
        };
        for batch in ready.chunks(self.config.max_concurrent_syncs) {
            let applied = join_all(batch.iter().map(|device| self.flush_inbound(device))).await;
            report.changes_applied += applied.into_iter().sum::<usize>();
        }
        report.devices_flushed = ready.len();

        if report != BackgroundReport::default() {
            debug!(
                "Background pass: {} offline, {} flushed, {} applied",
                report.marked_offline, report.devices_flushed, report.changes_applied
            );
        }
        report
    }

    /// Service status, optionally narrowed to one device.
    pub async fn get_sync_status(&self, device: Option<&DeviceId>) -> SyncResult<SyncStatus> {
        let records: Vec<DeviceRecord> = match device {
            Some(id) => vec![self
                .device(id)
                .await
                .ok_or_else(|| SyncError::DeviceNotFound(id.clone()))?],
            None => self.devices().await,
        };
        let devices = {
            let queues = self.offline_lock.lock().await;
            records
                .into_iter()
                .map(|record| DeviceStatusReport {
                    queued_changes: queues.len(&record.id),
                    device: record,
                })
                .collect()
        };
        let history = self
            .history_lock
            .lock()
            .await
            .iter()
            .filter(|r| device.is_none_or(|d| &r.device == d))
            .cloned()
            .collect();
        let mut strategies: Vec<String> = self.strategy_lock.read().await.keys().cloned().collect();
        strategies.sort();

        Ok(SyncStatus {
            devices,
            active_syncs: self.active_syncs.load(Ordering::SeqCst),
            history,
            strategies,
        })
    }

    /// Starts the store-event consumer and the periodic background pass.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let mut tasks = TaskHandle::new("sync-service");

        let service = Arc::clone(self);
        tasks.spawn_consumer("store-events", self.store.subscribe(), move |event| {
            let service = Arc::clone(&service);
            async move { service.observe(&event).await }
        });

        let service = Arc::clone(self);
        tasks.spawn_periodic("background-sync", self.config.sync_interval(), move || {
            let service = Arc::clone(&service);
            async move {
                service.run_background_pass().await;
            }
        });

        tasks
    }
}

/// Keeps one change per id, the one with the highest timestamp, at the
/// position the id first appeared. Ties keep the earlier change.
fn newest_per_id(changes: impl IntoIterator<Item = SyncChange>) -> Vec<SyncChange> {
    let mut kept: Vec<SyncChange> = Vec::new();
    let mut index: HashMap<ContextId, usize> = HashMap::new();
    for change in changes {
        match index.get(&change.id) {
            Some(&at) => {
                if change.timestamp > kept[at].timestamp {
                    kept[at] = change;
                }
            }
            None => {
                index.insert(change.id.clone(), kept.len());
                kept.push(change);
            }
        }
    }
    kept
}

fn change_outcome(change: &SyncChange, status: ChangeStatus, error: Option<String>) -> ChangeOutcome {
    ChangeOutcome {
        id: change.id.clone(),
        context_type: change.context_type.clone(),
        status,
        error,
    }
}
