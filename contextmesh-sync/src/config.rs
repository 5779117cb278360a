//! Sync service configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncServiceConfig {
    /// Upper bound on concurrent sync sessions (and queue flushes per batch).
    pub max_concurrent_syncs: usize,
    /// Period of the background pass (ms).
    pub sync_interval_ms: u64,
    /// Devices not seen for this long are marked offline (ms, 0 = never).
    pub offline_after_ms: u64,
    /// Per-device offline queue bound; the oldest change is dropped on
    /// overflow.
    pub max_offline_queue: usize,
    /// Number of sync sessions kept in history.
    pub history_size: usize,
    /// Compress outgoing payloads for devices that support it.
    pub compression: bool,
    /// Strategy used when a call does not name one.
    pub default_strategy: String,
    /// Types synced first when a device declares no priorities, in order.
    pub type_priorities: Vec<String>,
    /// Queue local changes for offline devices.
    pub auto_enqueue: bool,
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: 5,
            sync_interval_ms: 30_000,
            offline_after_ms: 5 * 60 * 1000,
            max_offline_queue: 1000,
            history_size: 100,
            compression: true,
            default_strategy: "last_write_wins".to_string(),
            type_priorities: Vec::new(),
            auto_enqueue: true,
        }
    }
}

impl SyncServiceConfig {
    /// Background pass period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    /// Staleness threshold, if enabled.
    pub fn offline_after(&self) -> Option<Duration> {
        (self.offline_after_ms > 0).then(|| Duration::from_millis(self.offline_after_ms))
    }

    /// Checks the configuration. Called by `SyncService::new`.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_concurrent_syncs == 0 {
            return Err(SyncError::Config(
                "max_concurrent_syncs must be positive".to_string(),
            ));
        }
        if self.max_offline_queue == 0 {
            return Err(SyncError::Config(
                "max_offline_queue must be positive".to_string(),
            ));
        }
        if self.default_strategy.is_empty() {
            return Err(SyncError::Config(
                "default_strategy must name a strategy".to_string(),
            ));
        }
        Ok(())
    }
}
