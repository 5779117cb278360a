//! Fusion strategies.
//!
//! A strategy receives every contributing type of one modality group and
//! produces one merged value for the group plus the authoritative pick for
//! each type. Strategies are synchronous; they only see a snapshot of the
//! contributions taken under the registration lock.

use contextmesh_types::{shallow_merge, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One source's raw value for a context type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: String,
    pub data: Value,
    /// Declared confidence in `[0, 1]`.
    pub confidence: f64,
    pub timestamp: Timestamp,
}

impl Contribution {
    pub fn new(source: impl Into<String>, data: Value, confidence: f64) -> Self {
        Self {
            source: source.into(),
            data,
            confidence,
            timestamp: Timestamp::now(),
        }
    }
}

/// All contributions for one type, in registration order.
#[derive(Debug, Clone)]
pub struct TypeInput {
    pub context_type: String,
    pub contributions: Vec<Contribution>,
}

/// The authoritative value chosen for one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedValue {
    pub context_type: String,
    pub source: String,
    pub data: Value,
    pub confidence: f64,
    /// Number of sources that contributed.
    pub contributors: usize,
}

/// Output of a strategy for one modality group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFusion {
    pub per_type: Vec<FusedValue>,
    pub data: Value,
    pub confidence: f64,
}

/// A per-modality fusion function.
pub trait FusionStrategy: Send + Sync {
    /// Name used in logs and results.
    fn name(&self) -> &str;

    /// Fuses one modality group. `inputs` is never empty and each input has
    /// at least one contribution.
    fn fuse(&self, inputs: &[TypeInput]) -> GroupFusion;
}

/// Picks the contribution with the highest declared confidence.
///
/// Ties go to the earliest registered source.
pub fn pick_authoritative(input: &TypeInput) -> Option<FusedValue> {
    let mut best: Option<&Contribution> = None;
    for contribution in &input.contributions {
        if best.is_none_or(|b| contribution.confidence > b.confidence) {
            best = Some(contribution);
        }
    }
    best.map(|winner| FusedValue {
        context_type: input.context_type.clone(),
        source: winner.source.clone(),
        data: winner.data.clone(),
        confidence: winner.confidence,
        contributors: input.contributions.len(),
    })
}

/// Shallow-merges contributions in order, later over earlier.
///
/// The result keeps the highest confidence and the latest timestamp seen, and
/// is attributed to the last contribution's source.
pub fn merge_contributions(contributions: &[Contribution]) -> Option<Contribution> {
    let (first, rest) = contributions.split_first()?;
    Some(rest.iter().fold(first.clone(), |merged, next| Contribution {
        source: next.source.clone(),
        data: shallow_merge(&merged.data, &next.data),
        confidence: merged.confidence.max(next.confidence),
        timestamp: merged.timestamp.max(next.timestamp),
    }))
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Pick-max-confidence per type. A group of several types fuses into an
/// object keyed by type.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestConfidence;

impl FusionStrategy for HighestConfidence {
    fn name(&self) -> &str {
        "highest_confidence"
    }

    fn fuse(&self, inputs: &[TypeInput]) -> GroupFusion {
        let per_type: Vec<FusedValue> = inputs.iter().filter_map(pick_authoritative).collect();
        let data = match per_type.as_slice() {
            [single] => single.data.clone(),
            many => Value::Object(
                many.iter()
                    .map(|v| (v.context_type.clone(), v.data.clone()))
                    .collect::<Map<_, _>>(),
            ),
        };
        let confidence = mean(per_type.iter().map(|v| v.confidence));
        GroupFusion {
            per_type,
            data,
            confidence,
        }
    }
}

/// Pick-max-confidence per type, then newline-joins the picks of every type
/// in the group. Non-string values are joined as their JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextConcatenation;

impl FusionStrategy for TextConcatenation {
    fn name(&self) -> &str {
        "text_concatenation"
    }

    fn fuse(&self, inputs: &[TypeInput]) -> GroupFusion {
        let per_type: Vec<FusedValue> = inputs.iter().filter_map(pick_authoritative).collect();
        let data = match per_type.as_slice() {
            [single] => single.data.clone(),
            many => Value::String(
                many.iter()
                    .filter(|v| !v.data.is_null())
                    .map(|v| match &v.data {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        };
        let confidence = mean(per_type.iter().map(|v| v.confidence));
        GroupFusion {
            per_type,
            data,
            confidence,
        }
    }
}
