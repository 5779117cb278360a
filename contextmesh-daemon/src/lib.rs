//! Wires the contextmesh subsystems together.
//!
//! [`ContextMesh::start`] builds the store, loads its snapshot, builds the
//! fusion, priority and sync layers on top of it and starts every background
//! task. [`ContextMesh::shutdown`] stops the tasks and writes a final
//! snapshot.

mod config;

pub use config::{AccessConfig, AccessMode, MeshConfig};

use contextmesh_fusion::{FusionEngine, FusionError};
use contextmesh_priority::{PriorityEngine, PriorityError};
use contextmesh_store::{ContextStore, StoreError, TaskHandle};
use contextmesh_sync::{AccessPolicy, AllowAllPolicy, RoleAccessPolicy, SyncError, SyncService};
use contextmesh_types::DeviceId;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Result type for daemon operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors raised while starting or stopping the mesh.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read config {}: {reason}", path.display())]
    ReadConfig { path: PathBuf, reason: String },

    #[error("invalid config {}: {reason}", path.display())]
    ParseConfig { path: PathBuf, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fusion(#[from] FusionError),

    #[error(transparent)]
    Priority(#[from] PriorityError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A running set of subsystems sharing one store.
#[derive(Debug)]
pub struct ContextMesh {
    store: Arc<ContextStore>,
    fusion: Arc<FusionEngine>,
    priority: Arc<PriorityEngine>,
    sync: Arc<SyncService>,
    tasks: Vec<TaskHandle>,
}

impl ContextMesh {
    /// Builds every subsystem and starts its background tasks.
    pub async fn start(config: MeshConfig) -> MeshResult<Self> {
        let store = Arc::new(ContextStore::new(config.store)?);
        if let Some(path) = store.snapshot_path() {
            let loaded = store.load().await?;
            info!("Loaded {} contexts from {}", loaded, path.display());
        }

        let fusion = Arc::new(FusionEngine::new(config.fusion, Arc::clone(&store))?);
        let priority = Arc::new(PriorityEngine::new(
            config.priority,
            Arc::clone(&store),
            Arc::clone(&fusion),
        )?);
        let policy = build_policy(&config.access).await;
        let sync = Arc::new(SyncService::new(config.sync, Arc::clone(&store), policy)?);

        let tasks = vec![
            store.spawn_maintenance(),
            fusion.spawn(),
            priority.spawn(),
            sync.spawn(),
        ];
        info!(
            "contextmesh started ({} background tasks)",
            tasks.iter().map(TaskHandle::len).sum::<usize>()
        );

        Ok(Self {
            store,
            fusion,
            priority,
            sync,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn fusion(&self) -> &Arc<FusionEngine> {
        &self.fusion
    }

    pub fn priority(&self) -> &Arc<PriorityEngine> {
        &self.priority
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    /// Stops every background task, newest subsystem first, then flushes the
    /// store. Returns the number of entries written.
    pub async fn shutdown(mut self) -> MeshResult<usize> {
        while let Some(tasks) = self.tasks.pop() {
            tasks.shutdown().await;
        }
        let written = self.store.flush().await?;
        info!("contextmesh stopped ({} contexts flushed)", written);
        Ok(written)
    }
}

async fn build_policy(access: &AccessConfig) -> Arc<dyn AccessPolicy> {
    match access.mode {
        AccessMode::AllowAll => Arc::new(AllowAllPolicy),
        AccessMode::Roles => {
            let policy = RoleAccessPolicy::new();
            for (device, role) in &access.roles {
                policy.set_device_role(DeviceId::new(device.clone()), *role).await;
            }
            Arc::new(policy)
        }
    }
}
