//! TOML configuration for the daemon.
//!
//! ```toml
//! [store]
//! max_context_entries = 1000
//!
//! [store.persistence]
//! enabled = true
//! path = "/var/lib/contextmesh/snapshot.json"
//!
//! [sync]
//! default_strategy = "merge"
//!
//! [access]
//! mode = "roles"
//!
//! [access.roles]
//! laptop = "editor"
//! ```

use crate::{MeshError, MeshResult};
use contextmesh_fusion::FusionConfig;
use contextmesh_priority::PriorityConfig;
use contextmesh_store::StoreConfig;
use contextmesh_sync::{SyncRole, SyncServiceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Which access policy sync sessions run under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    AllowAll,
    Roles,
}

/// Access policy settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub mode: AccessMode,
    /// Device id to role, used in `roles` mode.
    pub roles: BTreeMap<String, SyncRole>,
}

/// Configuration for every subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub store: StoreConfig,
    pub fusion: FusionConfig,
    pub priority: PriorityConfig,
    pub sync: SyncServiceConfig,
    pub access: AccessConfig,
}

impl MeshConfig {
    /// Reads a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> MeshResult<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| MeshError::ReadConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            MeshError::ParseConfig { reason, .. } => MeshError::ParseConfig {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parses TOML text.
    pub fn parse(content: &str) -> MeshResult<Self> {
        toml::from_str(content).map_err(|e| MeshError::ParseConfig {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Turns snapshot persistence on at `path`, keeping the other
    /// persistence settings.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.persistence.enabled = true;
        self.store.persistence.path = Some(path.into());
        self
    }
}
