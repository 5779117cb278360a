//! Error types for the sync service.

use contextmesh_store::StoreError;
use contextmesh_types::DeviceId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The device was never registered (or was unregistered).
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// The access policy denied the operation.
    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    /// A payload could not be compressed or decompressed.
    #[error("codec error: {0}")]
    Codec(String),

    /// No conflict strategy is registered under this name.
    #[error("unknown conflict strategy: {0}")]
    UnknownStrategy(String),

    /// Invalid configuration or registration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The service is shutting down.
    #[error("sync service closed")]
    Closed,

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
