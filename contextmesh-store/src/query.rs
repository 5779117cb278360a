//! Query filters over the context map.
//!
//! Queries are a filter pass followed by a sort over the whole entry set. The
//! store is size-capped, so this stays cheap.

use contextmesh_types::{ContextEntry, ContextId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Field to sort query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Timestamp,
    Priority,
    Confidence,
    Type,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// A filter over stored entries. Empty fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextQuery {
    pub ids: Option<Vec<ContextId>>,
    pub source: Option<String>,
    /// Exact type, or `prefix.*` for a whole namespace.
    pub context_type: Option<String>,
    /// Entries must carry all of these.
    pub tags: Vec<String>,
    pub min_confidence: Option<f64>,
    pub min_priority: Option<u8>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub include_expired: bool,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl ContextQuery {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches one type (or `prefix.*` namespace).
    pub fn of_type(context_type: impl Into<String>) -> Self {
        Self {
            context_type: Some(context_type.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    #[must_use]
    pub fn min_priority(mut self, min: u8) -> Self {
        self.min_priority = Some(min);
        self
    }

    #[must_use]
    pub fn between(mut self, since: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    #[must_use]
    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    #[must_use]
    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.order = order;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `entry` passes every filter at time `now`.
    pub fn matches(&self, entry: &ContextEntry, now: Timestamp) -> bool {
        if !self.include_expired && entry.is_expired_at(now) {
            return false;
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&entry.id) {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &entry.source != source {
                return false;
            }
        }
        if let Some(pattern) = &self.context_type {
            if !type_matches(pattern, &entry.context_type) {
                return false;
            }
        }
        if !entry.has_all_tags(self.tags.iter()) {
            return false;
        }
        if self.min_confidence.is_some_and(|min| entry.confidence < min) {
            return false;
        }
        if self.min_priority.is_some_and(|min| entry.priority < min) {
            return false;
        }
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        true
    }

    /// Sorts and truncates matched entries in place.
    pub fn sort_and_limit(&self, entries: &mut Vec<ContextEntry>) {
        entries.sort_by(|a, b| {
            let ord = compare(a, b, self.sort_by);
            match self.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }
    }
}

fn compare(a: &ContextEntry, b: &ContextEntry, field: SortField) -> Ordering {
    let primary = match field {
        SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Confidence => a.confidence.total_cmp(&b.confidence),
        SortField::Type => a.context_type.cmp(&b.context_type),
    };
    // ids break ties so results are deterministic
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Matches a type against an exact name or a `prefix.*` wildcard.
pub fn type_matches(pattern: &str, context_type: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => context_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == context_type,
    }
}
