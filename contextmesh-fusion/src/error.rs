//! Error types for the fusion engine.

use contextmesh_store::StoreError;
use thiserror::Error;

/// Result type for fusion operations.
pub type FusionResult<T> = Result<T, FusionError>;

/// Errors that can occur during fusion.
#[derive(Debug, Error)]
pub enum FusionError {
    /// The context type is not a well-formed namespaced type.
    #[error("invalid context type: {0}")]
    InvalidContextType(String),

    /// A source name was empty.
    #[error("source is required")]
    MissingSource,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Publishing a fused result to the store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<contextmesh_types::Error> for FusionError {
    fn from(err: contextmesh_types::Error) -> Self {
        match err {
            contextmesh_types::Error::InvalidContextType(t) => Self::InvalidContextType(t),
            other => Self::Store(StoreError::from(other)),
        }
    }
}
