//! Core type definitions for contextmesh.
//!
//! This crate defines the fundamental types shared by every subsystem:
//! - Context and device identifiers
//! - Millisecond wall-clock timestamps
//! - The `ContextEntry` record and its builders
//! - Change notifications published by the context store
//!
//! Payloads are opaque `serde_json::Value`s. Schema validation belongs to the
//! producers that own each context type, not here.

mod entry;
mod event;
mod ids;
mod timestamp;

pub use entry::{
    clamp_confidence, clamp_priority, shallow_merge, validate_context_type, ContextEntry,
    ContextUpdate, NewContext, DEFAULT_CONFIDENCE, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
pub use event::{ChangeKind, ChangeOrigin, ContextEvent};
pub use ids::{ContextId, DeviceId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid context type: {0}")]
    InvalidContextType(String),
}
