//! Error types for the context store.

use contextmesh_crypto::CryptoError;
use contextmesh_types::ContextId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required field was missing or out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The context type is not a well-formed namespaced type.
    #[error("invalid context type: {0}")]
    InvalidContextType(String),

    /// No live entry with this id.
    #[error("context not found: {0}")]
    NotFound(ContextId),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Snapshot could not be written or read.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Snapshot encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<contextmesh_types::Error> for StoreError {
    fn from(err: contextmesh_types::Error) -> Self {
        match err {
            contextmesh_types::Error::InvalidContextType(t) => Self::InvalidContextType(t),
            contextmesh_types::Error::Serialization(e) => Self::Serialization(e),
        }
    }
}
