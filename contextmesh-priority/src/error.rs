//! Error types for the priority engine.

use thiserror::Error;

/// Result type for priority operations.
pub type PriorityResult<T> = Result<T, PriorityError>;

/// Errors that can occur in priority operations.
#[derive(Debug, Error, PartialEq)]
pub enum PriorityError {
    /// Decay rate outside `[0, 1]`.
    #[error("decay rate must be within [0, 1], got {0}")]
    InvalidDecayRate(f64),

    /// Relevance or attention signal outside `[0, 1]`.
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidSignal { name: &'static str, value: f64 },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
