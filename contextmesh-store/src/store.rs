//! The context store.
//!
//! `ContextStore` is the single source of truth for context entries. All map
//! access goes through `context_lock`; snapshot writes go through the
//! snapshotter's own lock, after the entries have been cloned out. Change
//! events are published after the map lock is released.

use crate::bus::{ChangeBus, ChangeSubscription};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::query::ContextQuery;
use crate::snapshot::Snapshotter;
use crate::task::TaskHandle;
use contextmesh_types::{
    clamp_confidence, clamp_priority, shallow_merge, validate_context_type, ChangeKind,
    ChangeOrigin, ContextEntry, ContextEvent, ContextId, ContextUpdate, NewContext, Timestamp,
    DEFAULT_CONFIDENCE, DEFAULT_PRIORITY,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Entries at or above this priority are never evicted.
pub const PROTECTED_PRIORITY: u8 = 8;

/// Writes with confidence above this are persisted immediately.
const URGENT_CONFIDENCE: f64 = 0.8;

/// Writes with priority above this are persisted immediately.
const URGENT_PRIORITY: u8 = 7;

/// Options for `ContextStore::update`.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Shallow-merge `data` (and `metadata`) instead of replacing them.
    pub merge: bool,
    /// Refresh the timestamp to now. An explicit timestamp in the update
    /// always wins.
    pub update_timestamp: bool,
    /// Insert the entry if it does not exist.
    pub upsert: bool,
    /// Reported on the resulting change event.
    pub origin: ChangeOrigin,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            merge: false,
            update_timestamp: true,
            upsert: false,
            origin: ChangeOrigin::Local,
        }
    }
}

impl UpdateOptions {
    #[must_use]
    pub fn merge(mut self) -> Self {
        self.merge = true;
        self
    }

    #[must_use]
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    #[must_use]
    pub fn keep_timestamp(mut self) -> Self {
        self.update_timestamp = false;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: ChangeOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Entries dropped because their expiry passed.
    pub expired: usize,
    /// Entries dropped to get back under the size cap.
    pub evicted: usize,
    /// Eviction candidates skipped because they are protected.
    pub protected: usize,
    /// Entries left after the pass.
    pub remaining: usize,
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub entries: usize,
    pub types: usize,
    pub dirty: bool,
    pub subscribers: usize,
    pub persistence_enabled: bool,
    pub last_flush: Option<Timestamp>,
    pub flush_count: u64,
}

/// Authoritative map of context entries.
#[derive(Debug)]
pub struct ContextStore {
    config: StoreConfig,
    context_lock: RwLock<HashMap<ContextId, ContextEntry>>,
    snapshotter: Option<Snapshotter>,
    dirty: AtomicBool,
    bus: ChangeBus,
}

impl ContextStore {
    /// Creates an empty store. Fails if the configuration is invalid or the
    /// snapshot key cannot be resolved.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let snapshotter = Snapshotter::from_config(&config.persistence)?;
        let bus = ChangeBus::new(config.event_capacity);
        info!(
            "Context store created (max {} entries, persistence {})",
            config.max_context_entries,
            if snapshotter.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            config,
            context_lock: RwLock::new(HashMap::new()),
            snapshotter,
            dirty: AtomicBool::new(false),
            bus,
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Snapshot file path, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshotter.as_ref().map(Snapshotter::path)
    }

    /// Subscribes to change events published from now on.
    pub fn subscribe(&self) -> ChangeSubscription {
        self.bus.subscribe()
    }

    /// Adds an entry on behalf of a local producer.
    pub async fn add(&self, context: NewContext) -> StoreResult<ContextEntry> {
        self.add_with_origin(context, ChangeOrigin::Local).await
    }

    /// Adds an entry, tagging the change event with `origin`.
    ///
    /// An existing entry with the same id is replaced and reported as
    /// `Updated`.
    pub async fn add_with_origin(
        &self,
        context: NewContext,
        origin: ChangeOrigin,
    ) -> StoreResult<ContextEntry> {
        let entry = self.build_entry(context, Timestamp::now())?;
        let kind = {
            let mut map = self.context_lock.write().await;
            match map.insert(entry.id.clone(), entry.clone()) {
                Some(_) => ChangeKind::Updated,
                None => ChangeKind::Added,
            }
        };
        debug!("Stored context {} ({})", entry.id, entry.context_type);
        self.bus.publish(ContextEvent::new(kind, entry.clone(), origin));
        self.persist_after_write(&entry).await?;
        Ok(entry)
    }

    /// Updates an entry in place.
    ///
    /// A missing (or expired) id is inserted when `options.upsert` is set and
    /// the update carries a source and a type; otherwise `NotFound`.
    pub async fn update(
        &self,
        id: &ContextId,
        update: ContextUpdate,
        options: UpdateOptions,
    ) -> StoreResult<ContextEntry> {
        let now = Timestamp::now();
        let mut events = Vec::with_capacity(2);
        let outcome = {
            let mut map = self.context_lock.write().await;
            if map.get(id).is_some_and(|e| e.is_expired_at(now)) {
                if let Some(expired) = map.remove(id) {
                    events.push(ContextEvent::new(
                        ChangeKind::Expired,
                        expired,
                        ChangeOrigin::Local,
                    ));
                }
            }

            let outcome = match map.get(id) {
                Some(existing) => self
                    .apply_update(existing, update, &options, now)
                    .map(|entry| (ChangeKind::Updated, entry)),
                None if options.upsert => update
                    .into_new_context(id.clone())
                    .ok_or_else(|| {
                        StoreError::Validation(format!(
                            "upsert of missing context {id} requires source and type"
                        ))
                    })
                    .and_then(|context| self.build_entry(context, now))
                    .map(|entry| (ChangeKind::Added, entry)),
                None => Err(StoreError::NotFound(id.clone())),
            };

            if let Ok((kind, entry)) = &outcome {
                map.insert(entry.id.clone(), entry.clone());
                events.push(ContextEvent::new(*kind, entry.clone(), options.origin.clone()));
            }
            outcome
        };

        if !events.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        for event in events {
            self.bus.publish(event);
        }

        let (_, entry) = outcome?;
        debug!("Updated context {} ({})", entry.id, entry.context_type);
        self.persist_after_write(&entry).await?;
        Ok(entry)
    }

    /// Removes an entry. Returns the removed entry, if there was one.
    pub async fn remove(&self, id: &ContextId) -> Option<ContextEntry> {
        let removed = self.context_lock.write().await.remove(id);
        if let Some(entry) = &removed {
            self.dirty.store(true, Ordering::SeqCst);
            debug!("Removed context {} ({})", entry.id, entry.context_type);
            self.bus.publish(ContextEvent::new(
                ChangeKind::Removed,
                entry.clone(),
                ChangeOrigin::Local,
            ));
        }
        removed
    }

    /// Reads an entry.
    ///
    /// An entry whose expiry has passed is deleted on the spot and reported
    /// as missing. A hit publishes a `Requested` event.
    pub async fn get(&self, id: &ContextId) -> Option<ContextEntry> {
        let now = Timestamp::now();
        {
            let map = self.context_lock.read().await;
            match map.get(id) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => {
                    let entry = entry.clone();
                    drop(map);
                    self.publish_requested(&entry);
                    return Some(entry);
                }
                Some(_) => {}
            }
        }

        // Expired under the read lock; re-check under the write lock.
        let (live, expired) = {
            let mut map = self.context_lock.write().await;
            match map.get(id) {
                Some(entry) if entry.is_expired_at(now) => (None, map.remove(id)),
                Some(entry) => (Some(entry.clone()), None),
                None => (None, None),
            }
        };

        if let Some(entry) = expired {
            self.dirty.store(true, Ordering::SeqCst);
            debug!("Context {} expired on read", entry.id);
            self.bus.publish(ContextEvent::new(
                ChangeKind::Expired,
                entry,
                ChangeOrigin::Local,
            ));
        }
        if let Some(entry) = &live {
            self.publish_requested(entry);
        }
        live
    }

    /// Reads an entry without publishing an event or expiring it.
    pub async fn peek(&self, id: &ContextId) -> Option<ContextEntry> {
        self.context_lock.read().await.get(id).cloned()
    }

    /// Returns matching entries, sorted and limited as requested.
    pub async fn query(&self, query: &ContextQuery) -> Vec<ContextEntry> {
        let now = Timestamp::now();
        let mut matched: Vec<ContextEntry> = {
            let map = self.context_lock.read().await;
            map.values()
                .filter(|entry| query.matches(entry, now))
                .cloned()
                .collect()
        };
        query.sort_and_limit(&mut matched);
        matched
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.context_lock.read().await.len()
    }

    /// Returns true if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.context_lock.read().await.is_empty()
    }

    /// Distinct types of live entries, sorted.
    pub async fn context_types(&self) -> Vec<String> {
        let now = Timestamp::now();
        let map = self.context_lock.read().await;
        map.values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.context_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Most recent live entry of a type, optionally ignoring one source.
    pub async fn latest_of_type(
        &self,
        context_type: &str,
        exclude_source: Option<&str>,
    ) -> Option<ContextEntry> {
        let now = Timestamp::now();
        let map = self.context_lock.read().await;
        map.values()
            .filter(|entry| entry.context_type == context_type)
            .filter(|entry| !entry.is_expired_at(now))
            .filter(|entry| exclude_source != Some(entry.source.as_str()))
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
            .cloned()
    }

    /// Returns true if eviction must skip this entry.
    pub fn is_protected(&self, entry: &ContextEntry) -> bool {
        entry.priority >= PROTECTED_PRIORITY || entry.confidence > self.config.pruning_threshold
    }

    /// Runs a pruning pass at the current time.
    pub async fn prune(&self) -> PruneReport {
        self.prune_at(Timestamp::now()).await
    }

    /// Runs a pruning pass as if the time were `now`.
    ///
    /// Deletes every expired entry, then evicts the lowest-confidence
    /// unprotected entries until the size cap is met. Protected entries stay
    /// even if the cap cannot be reached.
    pub async fn prune_at(&self, now: Timestamp) -> PruneReport {
        let mut report = PruneReport::default();
        let mut events = Vec::new();
        {
            let mut map = self.context_lock.write().await;

            let expired: Vec<ContextId> = map
                .values()
                .filter(|entry| entry.is_expired_at(now))
                .map(|entry| entry.id.clone())
                .collect();
            for id in expired {
                if let Some(entry) = map.remove(&id) {
                    report.expired += 1;
                    events.push(ContextEvent::new(
                        ChangeKind::Expired,
                        entry,
                        ChangeOrigin::Local,
                    ));
                }
            }

            let cap = self.config.max_context_entries;
            if map.len() > cap {
                let mut candidates: Vec<(f64, Timestamp, ContextId)> = map
                    .values()
                    .map(|entry| (entry.confidence, entry.timestamp, entry.id.clone()))
                    .collect();
                // lowest confidence first, older first among equals
                candidates.sort_by(|a, b| {
                    a.0.total_cmp(&b.0)
                        .then_with(|| a.1.cmp(&b.1))
                        .then_with(|| a.2.cmp(&b.2))
                });

                for (_, _, id) in candidates {
                    if map.len() <= cap {
                        break;
                    }
                    let protected = map.get(&id).is_some_and(|entry| self.is_protected(entry));
                    if protected {
                        report.protected += 1;
                        continue;
                    }
                    if let Some(entry) = map.remove(&id) {
                        report.evicted += 1;
                        events.push(ContextEvent::new(
                            ChangeKind::Evicted,
                            entry,
                            ChangeOrigin::Local,
                        ));
                    }
                }
                if map.len() > cap {
                    warn!(
                        "Store holds {} entries over a cap of {}; the rest are protected",
                        map.len(),
                        cap
                    );
                }
            }
            report.remaining = map.len();
        }

        if !events.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
            info!(
                "Pruned {} expired and {} evicted entries, {} remaining",
                report.expired, report.evicted, report.remaining
            );
        }
        for event in events {
            self.bus.publish(event);
        }
        report
    }

    /// Returns true if there are changes not yet written to the snapshot.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Writes a snapshot now. Returns the number of entries written, or 0 if
    /// persistence is disabled.
    pub async fn flush(&self) -> StoreResult<usize> {
        let Some(snapshotter) = &self.snapshotter else {
            return Ok(0);
        };
        let now = Timestamp::now();
        // cleared under the map lock: a write that lands after the clone
        // marks the store dirty again
        let entries: Vec<ContextEntry> = {
            let map = self.context_lock.read().await;
            self.dirty.swap(false, Ordering::SeqCst);
            map.values()
                .filter(|entry| !entry.is_expired_at(now))
                .cloned()
                .collect()
        };

        match snapshotter.write(entries).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!("Snapshot flush failed: {}", e);
                Err(e)
            }
        }
    }

    /// Restores entries from the snapshot file, dropping any that expired
    /// while the process was down. Returns the number restored.
    ///
    /// Restored entries do not produce change events.
    pub async fn load(&self) -> StoreResult<usize> {
        let Some(snapshotter) = &self.snapshotter else {
            return Ok(0);
        };
        let entries = snapshotter
            .read()
            .await
            .inspect_err(|e| warn!("Failed to load snapshot: {}", e))?;

        let now = Timestamp::now();
        let total = entries.len();
        let mut restored = 0;
        {
            let mut map = self.context_lock.write().await;
            for mut entry in entries {
                if entry.is_expired_at(now) {
                    continue;
                }
                entry.priority = clamp_priority(entry.priority);
                entry.confidence = clamp_confidence(entry.confidence);
                map.insert(entry.id.clone(), entry);
                restored += 1;
            }
        }
        info!("Restored {} of {} snapshot entries", restored, total);
        Ok(restored)
    }

    /// Current statistics.
    pub async fn stats(&self) -> StoreStats {
        let (entries, types) = {
            let map = self.context_lock.read().await;
            let types = map
                .values()
                .map(|entry| entry.context_type.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            (map.len(), types)
        };
        let snapshot = self.snapshotter.as_ref().map(Snapshotter::stats);
        StoreStats {
            entries,
            types,
            dirty: self.is_dirty(),
            subscribers: self.bus.subscriber_count(),
            persistence_enabled: snapshot.is_some(),
            last_flush: snapshot.as_ref().and_then(|s| s.last_flush),
            flush_count: snapshot.map_or(0, |s| s.flush_count),
        }
    }

    /// Starts the pruning loop and, when persistence is on, the scheduled
    /// snapshot loop.
    pub fn spawn_maintenance(self: &Arc<Self>) -> TaskHandle {
        let mut tasks = TaskHandle::new("context-store");

        let store = Arc::clone(self);
        tasks.spawn_periodic("prune", self.config.pruning_interval(), move || {
            let store = Arc::clone(&store);
            async move {
                store.prune().await;
            }
        });

        if self.snapshotter.is_some() {
            let store = Arc::clone(self);
            tasks.spawn_periodic("snapshot", self.config.persistence.interval(), move || {
                let store = Arc::clone(&store);
                async move {
                    if store.is_dirty() {
                        // failure is logged by flush and retried next tick
                        let _ = store.flush().await;
                    }
                }
            });
        }

        tasks
    }

    fn publish_requested(&self, entry: &ContextEntry) {
        self.bus.publish(ContextEvent::new(
            ChangeKind::Requested,
            entry.clone(),
            ChangeOrigin::Local,
        ));
    }

    /// Persists immediately for high-confidence or high-priority writes,
    /// otherwise leaves the change for the next scheduled snapshot.
    async fn persist_after_write(&self, entry: &ContextEntry) -> StoreResult<()> {
        let urgent = entry.confidence > URGENT_CONFIDENCE || entry.priority > URGENT_PRIORITY;
        if urgent && self.snapshotter.is_some() {
            self.flush().await?;
        } else {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn build_entry(&self, context: NewContext, now: Timestamp) -> StoreResult<ContextEntry> {
        if context.source.trim().is_empty() {
            return Err(StoreError::Validation("source is required".to_string()));
        }
        validate_context_type(&context.context_type)?;

        let timestamp = context.timestamp.unwrap_or(now);
        let expiry_timestamp = match context.expiry_timestamp {
            Some(expiry) if expiry <= timestamp => {
                return Err(StoreError::Validation(format!(
                    "expiry {expiry} must be after timestamp {timestamp}"
                )));
            }
            Some(expiry) => Some(expiry),
            None => self
                .config
                .default_expiry()
                .map(|lifetime| timestamp.saturating_add(lifetime)),
        };

        Ok(ContextEntry {
            id: context.id.unwrap_or_default(),
            source: context.source,
            context_type: context.context_type,
            data: context.data,
            timestamp,
            expiry_timestamp,
            priority: clamp_priority(context.priority.unwrap_or(DEFAULT_PRIORITY)),
            confidence: clamp_confidence(context.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            tags: context.tags,
            metadata: context.metadata,
        })
    }

    fn apply_update(
        &self,
        existing: &ContextEntry,
        update: ContextUpdate,
        options: &UpdateOptions,
        now: Timestamp,
    ) -> StoreResult<ContextEntry> {
        let mut entry = existing.clone();

        if let Some(source) = update.source {
            if source.trim().is_empty() {
                return Err(StoreError::Validation("source is required".to_string()));
            }
            entry.source = source;
        }
        if let Some(context_type) = update.context_type {
            validate_context_type(&context_type)?;
            entry.context_type = context_type;
        }
        if let Some(data) = update.data {
            entry.data = if options.merge {
                shallow_merge(&entry.data, &data)
            } else {
                data
            };
        }
        if let Some(metadata) = update.metadata {
            if options.merge {
                entry.metadata.extend(metadata);
            } else {
                entry.metadata = metadata;
            }
        }
        if let Some(tags) = update.tags {
            entry.tags = tags;
        }
        if let Some(priority) = update.priority {
            entry.priority = clamp_priority(priority);
        }
        if let Some(confidence) = update.confidence {
            entry.confidence = clamp_confidence(confidence);
        }

        entry.timestamp = match update.timestamp {
            Some(timestamp) => timestamp,
            None if options.update_timestamp => now.max(existing.timestamp),
            None => existing.timestamp,
        };

        match update.expiry_timestamp {
            Some(expiry) if expiry <= entry.timestamp => {
                return Err(StoreError::Validation(format!(
                    "expiry {expiry} must be after timestamp {}",
                    entry.timestamp
                )));
            }
            Some(expiry) => entry.expiry_timestamp = Some(expiry),
            None => {
                // keep the old expiry unless the new timestamp has overtaken it
                if entry
                    .expiry_timestamp
                    .is_some_and(|expiry| expiry <= entry.timestamp)
                {
                    entry.expiry_timestamp = self
                        .config
                        .default_expiry()
                        .map(|lifetime| entry.timestamp.saturating_add(lifetime));
                }
            }
        }

        Ok(entry)
    }
}
