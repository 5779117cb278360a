//! Snapshot persistence.
//!
//! Each flush writes the full set of persistable entries as one JSON array,
//! optionally sealed into an `ivHex:authTagHex:cipherHex` envelope. The file
//! is replaced wholesale (write to a temp file, then rename); there is no
//! append-only log, so a crash loses at most the changes since the last flush.
//!
//! All file access goes through `persistence_lock`, which is separate from
//! the store's map lock: slow disk I/O never blocks in-memory operations.
//! Flush bookkeeping lives in atomics so status reads never wait on I/O.

use crate::config::PersistenceConfig;
use crate::error::{StoreError, StoreResult};
use crate::query::type_matches;
use contextmesh_crypto::{decrypt_string, encrypt_string, looks_like_envelope, SnapshotKey};
use contextmesh_types::{ContextEntry, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Writes and reads snapshot files.
#[derive(Debug)]
pub struct Snapshotter {
    config: PersistenceConfig,
    path: PathBuf,
    key: Option<SnapshotKey>,
    persistence_lock: Mutex<()>,
    /// Millis of the last successful flush; 0 means never.
    last_flush: AtomicU64,
    last_written: AtomicUsize,
    flush_count: AtomicU64,
}

/// Bookkeeping about past flushes.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub last_flush: Option<Timestamp>,
    pub last_written: usize,
    pub flush_count: u64,
}

impl Snapshotter {
    /// Creates a snapshotter; returns `None` when persistence is disabled.
    ///
    /// The key is resolved here so a bad key fails at startup.
    pub fn from_config(config: &PersistenceConfig) -> StoreResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let path = config.path.clone().ok_or_else(|| {
            StoreError::Config("persistence is enabled but no snapshot path is set".to_string())
        })?;
        let key = if config.encrypt {
            Some(config.key.resolve()?)
        } else {
            None
        };
        Ok(Some(Self {
            config: config.clone(),
            path,
            key,
            persistence_lock: Mutex::new(()),
            last_flush: AtomicU64::new(0),
            last_written: AtomicUsize::new(0),
            flush_count: AtomicU64::new(0),
        }))
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if `entry` may be written to disk.
    pub fn should_persist(&self, entry: &ContextEntry) -> bool {
        !self.config.excluded_sources.contains(&entry.source)
            && !self
                .config
                .excluded_types
                .iter()
                .any(|pattern| type_matches(pattern, &entry.context_type))
            && entry.confidence >= self.config.min_confidence
    }

    /// Writes `entries` (after filtering) as the new snapshot.
    ///
    /// Returns the number of entries written.
    pub async fn write(&self, entries: Vec<ContextEntry>) -> StoreResult<usize> {
        let _guard = self.persistence_lock.lock().await;

        let persisted: Vec<ContextEntry> = entries
            .into_iter()
            .filter(|e| self.should_persist(e))
            .collect();
        let count = persisted.len();

        let key = self.key.clone();
        let body = tokio::task::spawn_blocking(move || -> StoreResult<String> {
            let json = serde_json::to_string(&persisted)?;
            match key {
                Some(key) => Ok(encrypt_string(&key, &json)?),
                None => Ok(json),
            }
        })
        .await
        .map_err(|e| StoreError::Persistence(format!("snapshot encoder panicked: {e}")))??;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        self.last_flush
            .store(Timestamp::now().as_millis().max(1), Ordering::SeqCst);
        self.last_written.store(count, Ordering::SeqCst);
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        debug!("Wrote snapshot of {} entries to {}", count, self.path.display());
        Ok(count)
    }

    /// Reads the snapshot, if one exists.
    ///
    /// Plain JSON and encrypted envelopes are both accepted.
    pub async fn read(&self) -> StoreResult<Vec<ContextEntry>> {
        let _guard = self.persistence_lock.lock().await;

        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let json = if looks_like_envelope(&body) {
            let key = self.key.clone().ok_or_else(|| {
                StoreError::Persistence(
                    "snapshot is encrypted but encryption is disabled".to_string(),
                )
            })?;
            tokio::task::spawn_blocking(move || decrypt_string(&key, &body))
                .await
                .map_err(|e| StoreError::Persistence(format!("snapshot decoder panicked: {e}")))?
                .inspect_err(|e| warn!("Failed to decrypt snapshot: {}", e))?
        } else {
            body
        };

        Ok(serde_json::from_str(&json)?)
    }

    /// Returns the flush bookkeeping without waiting on a running flush.
    pub fn stats(&self) -> SnapshotStats {
        let last_flush = self.last_flush.load(Ordering::SeqCst);
        SnapshotStats {
            last_flush: (last_flush > 0).then(|| Timestamp::from_millis(last_flush)),
            last_written: self.last_written.load(Ordering::SeqCst),
            flush_count: self.flush_count.load(Ordering::SeqCst),
        }
    }
}
