//! Store and persistence configuration.

use crate::error::{StoreError, StoreResult};
use contextmesh_crypto::SnapshotKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the context store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Soft cap on live entries; protected entries may exceed it.
    pub max_context_entries: usize,
    /// Lifetime given to entries without an explicit expiry (ms, 0 = never).
    pub default_expiry_ms: u64,
    /// Entries with confidence above this are never evicted.
    pub pruning_threshold: f64,
    /// Period of the pruning pass (ms).
    pub pruning_interval_ms: u64,
    /// Capacity of the change broadcast channel.
    pub event_capacity: usize,
    /// Snapshot persistence.
    pub persistence: PersistenceConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_context_entries: 1000,
            default_expiry_ms: 60 * 60 * 1000,
            pruning_threshold: 0.9,
            pruning_interval_ms: 60_000,
            event_capacity: 1024,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Default lifetime as a duration, if any.
    pub fn default_expiry(&self) -> Option<Duration> {
        (self.default_expiry_ms > 0).then(|| Duration::from_millis(self.default_expiry_ms))
    }

    /// Pruning period.
    pub fn pruning_interval(&self) -> Duration {
        Duration::from_millis(self.pruning_interval_ms.max(1))
    }

    /// Checks ranges. Called by `ContextStore::new`.
    pub fn validate(&self) -> StoreResult<()> {
        if !(0.0..=1.0).contains(&self.pruning_threshold) {
            return Err(StoreError::Config(format!(
                "pruning_threshold must be within [0, 1], got {}",
                self.pruning_threshold
            )));
        }
        if self.event_capacity == 0 {
            return Err(StoreError::Config(
                "event_capacity must be positive".to_string(),
            ));
        }
        self.persistence.validate()
    }
}

/// Where the snapshot key comes from.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeySource {
    /// SHA-256 over local machine identifiers.
    #[default]
    Machine,
    /// SHA-256 over an explicit passphrase.
    Passphrase(String),
    /// 32 raw key bytes as hex.
    Hex(String),
}

impl KeySource {
    /// Produces the key material.
    pub fn resolve(&self) -> StoreResult<SnapshotKey> {
        Ok(match self {
            Self::Machine => SnapshotKey::machine_derived(),
            Self::Passphrase(p) => SnapshotKey::from_passphrase(p)?,
            Self::Hex(h) => SnapshotKey::from_hex(h)?,
        })
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Machine => f.write_str("Machine"),
            Self::Passphrase(_) => f.write_str("Passphrase([REDACTED])"),
            Self::Hex(_) => f.write_str("Hex([REDACTED])"),
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Whether snapshots are written at all.
    pub enabled: bool,
    /// Snapshot file path.
    pub path: Option<PathBuf>,
    /// Period of the scheduled flush (ms).
    pub interval_ms: u64,
    /// Encrypt snapshots with AES-256-GCM.
    pub encrypt: bool,
    /// Key used when `encrypt` is set.
    pub key: KeySource,
    /// Sources never written to disk.
    pub excluded_sources: Vec<String>,
    /// Types (exact or `prefix.*`) never written to disk.
    pub excluded_types: Vec<String>,
    /// Entries below this confidence are not written.
    pub min_confidence: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            interval_ms: 5 * 60 * 1000,
            encrypt: true,
            key: KeySource::default(),
            excluded_sources: Vec::new(),
            excluded_types: Vec::new(),
            min_confidence: 0.0,
        }
    }
}

impl PersistenceConfig {
    /// Enabled persistence writing to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Flush period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    fn validate(&self) -> StoreResult<()> {
        if self.enabled && self.path.is_none() {
            return Err(StoreError::Config(
                "persistence is enabled but no snapshot path is set".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(StoreError::Config(format!(
                "persistence min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}
