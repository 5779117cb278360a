//! The context entry record and the inputs used to create or change one.
//!
//! A `ContextEntry` is a timestamped, confidence-scored, typed unit of stored
//! information. Producers never build entries directly: they hand a
//! `NewContext` or a `ContextUpdate` to the store, which fills in defaults,
//! validates and clamps.

use crate::{ContextId, Error, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Lowest allowed priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest allowed priority.
pub const MAX_PRIORITY: u8 = 10;

/// Priority assigned when the producer does not declare one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Confidence assigned when the producer does not declare one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A single stored context fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Unique identifier.
    pub id: ContextId,
    /// Producer that contributed this entry.
    pub source: String,
    /// Namespaced type, e.g. `visual.objects`.
    #[serde(rename = "type")]
    pub context_type: String,
    /// Opaque payload.
    pub data: Value,
    /// Time of the latest mutation.
    pub timestamp: Timestamp,
    /// Absolute expiry time, always after `timestamp` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<Timestamp>,
    /// Importance in `[MIN_PRIORITY, MAX_PRIORITY]`.
    pub priority: u8,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Producer-defined metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ContextEntry {
    /// Returns true if the entry has an expiry strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiry_timestamp.is_some_and(|expiry| expiry < now)
    }

    /// Returns true if the entry carries every tag in `tags`.
    #[must_use]
    pub fn has_all_tags<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|t| self.tags.contains(t))
    }

    /// Returns the modality key: the first dotted segment of the type.
    #[must_use]
    pub fn modality(&self) -> &str {
        self.context_type
            .split('.')
            .next()
            .unwrap_or(&self.context_type)
    }
}

/// Input for creating a new context entry.
///
/// Only `source`, `context_type` and `data` are required; the store assigns
/// the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContext {
    #[serde(default)]
    pub id: Option<ContextId>,
    pub source: String,
    #[serde(rename = "type")]
    pub context_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub expiry_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewContext {
    /// Creates a new context input with the required fields.
    pub fn new(source: impl Into<String>, context_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            source: source.into(),
            context_type: context_type.into(),
            data,
            timestamp: None,
            expiry_timestamp: None,
            priority: None,
            confidence: None,
            tags: BTreeSet::new(),
            metadata: Map::new(),
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ContextId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets an explicit expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Timestamp) -> Self {
        self.expiry_timestamp = Some(expiry);
        self
    }

    /// Sets the priority (clamped by the store).
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the confidence (clamped by the store).
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a metadata key.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A partial change to an existing entry. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "type")]
    pub context_type: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub expiry_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl ContextUpdate {
    /// Creates an update that only replaces (or merges) the payload.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Converts an update into a creation request, used for upserts.
    ///
    /// Returns `None` when the update lacks the source or type an insert
    /// needs.
    #[must_use]
    pub fn into_new_context(self, id: ContextId) -> Option<NewContext> {
        let source = self.source?;
        let context_type = self.context_type?;
        Some(NewContext {
            id: Some(id),
            source,
            context_type,
            data: self.data.unwrap_or(Value::Null),
            timestamp: self.timestamp,
            expiry_timestamp: self.expiry_timestamp,
            priority: self.priority,
            confidence: self.confidence,
            tags: self.tags.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

/// Clamps a priority into `[MIN_PRIORITY, MAX_PRIORITY]`.
#[must_use]
pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Clamps a confidence into `[0, 1]`. NaN becomes 0.
#[must_use]
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Checks that a context type is a dotted, namespaced identifier.
///
/// Each segment must be non-empty and made of lowercase ASCII letters, digits, `_` or `-`.
pub fn validate_context_type(context_type: &str) -> Result<()> {
    if context_type.is_empty() {
        return Err(Error::InvalidContextType("empty context type".to_string()));
    }
    let well_formed = context_type.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    });
    if well_formed {
        Ok(())
    } else {
        Err(Error::InvalidContextType(context_type.to_string()))
    }
}

/// Shallow-merges `overlay` over `base`.
///
/// When both are JSON objects the overlay's top-level keys replace the base's;
/// otherwise the overlay replaces the base wholesale.
#[must_use]
pub fn shallow_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}
