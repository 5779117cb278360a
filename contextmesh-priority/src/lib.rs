//! Context prioritization for contextmesh.
//!
//! Every context type gets a score in `[min_priority, max_priority]`:
//!
//! ```text
//! score = clamp(0.3·recency + 0.4·relevance + 0.2·confidence + 0.1·attention)
//! recency = (1 - decay_rate)^(elapsed / decay_interval)
//! ```
//!
//! Weights, bounds and decay parameters are configurable. Confidence comes
//! from the fusion engine for types it has fused; relevance and attention are
//! pushed in by task and UI producers.

mod config;
mod engine;
mod error;

pub use config::{PriorityConfig, PriorityWeights};
pub use engine::{PriorityEngine, PriorityFactors, PriorityScore};
pub use error::{PriorityError, PriorityResult};
