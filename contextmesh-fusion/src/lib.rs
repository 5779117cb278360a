//! Context fusion for contextmesh.
//!
//! Several producers often report the same kind of context (two cameras
//! detecting objects, a microphone and a chat log both yielding text). The
//! fusion engine keeps each source's latest contribution per type and, on
//! demand or on its timer, picks or combines them into one authoritative
//! value with a confidence score:
//!
//! - types are grouped by modality (the first dotted segment of the type)
//! - each modality has a registered [`FusionStrategy`]
//! - when several modalities take part, their results are combined into a
//!   `fusion.unified` result
//!
//! [`merge_contributions`] is also the primitive sync's `merge` conflict
//! strategy builds on.

mod config;
mod engine;
mod error;
mod strategy;

pub use config::FusionConfig;
pub use engine::{
    modality_of, FusionEngine, FusionOutcome, GroupResult, UnifiedResult, FUSION_NAMESPACE,
    FUSION_SOURCE,
};
pub use error::{FusionError, FusionResult};
pub use strategy::{
    merge_contributions, pick_authoritative, Contribution, FusedValue, FusionStrategy,
    GroupFusion, HighestConfidence, TextConcatenation, TypeInput,
};
