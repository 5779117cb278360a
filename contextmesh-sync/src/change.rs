//! Sync session data: changes, requests, outcomes and responses.

use crate::codec::{compress_value, decompress_value};
use crate::error::SyncResult;
use contextmesh_types::{ContextEntry, ContextId, DeviceId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change payload, either plain or deflate+base64 compressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum SyncPayload {
    Plain(Value),
    Compressed(String),
}

impl SyncPayload {
    /// Wraps a value, compressing it if asked to.
    pub fn encode(value: Value, compress: bool) -> SyncResult<Self> {
        if compress {
            Ok(Self::Compressed(compress_value(&value)?))
        } else {
            Ok(Self::Plain(value))
        }
    }

    /// Returns the plain value.
    pub fn decode(&self) -> SyncResult<Value> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Compressed(encoded) => decompress_value(encoded),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }
}

/// Side information carried with a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMetadata {
    /// Device the change came from; `None` for changes produced here.
    pub origin_device: Option<DeviceId>,
    /// The change was queued while its target was offline.
    pub offline: bool,
    /// Producer of the underlying entry.
    pub source: Option<String>,
    pub confidence: Option<f64>,
    pub priority: Option<u8>,
}

/// One context change exchanged during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub id: ContextId,
    pub context_type: String,
    pub payload: SyncPayload,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: ChangeMetadata,
}

impl SyncChange {
    /// Creates an uncompressed change.
    pub fn new(
        id: impl Into<ContextId>,
        context_type: impl Into<String>,
        data: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            context_type: context_type.into(),
            payload: SyncPayload::Plain(data),
            timestamp,
            metadata: ChangeMetadata::default(),
        }
    }

    /// Builds the outgoing form of a stored entry.
    pub fn from_entry(entry: &ContextEntry, compress: bool) -> SyncResult<Self> {
        Ok(Self {
            id: entry.id.clone(),
            context_type: entry.context_type.clone(),
            payload: SyncPayload::encode(entry.data.clone(), compress)?,
            timestamp: entry.timestamp,
            metadata: ChangeMetadata {
                origin_device: None,
                offline: false,
                source: Some(entry.source.clone()),
                confidence: Some(entry.confidence),
                priority: Some(entry.priority),
            },
        })
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.metadata.priority = Some(priority);
        self
    }

    /// Compresses a plain payload in place.
    pub fn compressed(mut self) -> SyncResult<Self> {
        if let SyncPayload::Plain(value) = &self.payload {
            self.payload = SyncPayload::encode(value.clone(), true)?;
        }
        Ok(self)
    }
}

/// What a device sends to start a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub changes: Vec<SyncChange>,
    /// Time of the device's previous successful sync.
    pub last_sync_timestamp: Option<Timestamp>,
}

/// Per-call session options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Types to send back; all stored types when `None`.
    pub context_types: Option<Vec<String>>,
    /// Send every candidate type even if unchanged since the last sync.
    pub force_sync: bool,
    /// Conflict strategy for this call; the configured default when `None`.
    pub conflict_strategy: Option<String>,
}

/// How one incoming change fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Applied,
    /// Already stored at the same or a later timestamp; nothing changed.
    Duplicate,
    Error,
}

/// Outcome of one incoming change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    pub id: ContextId,
    pub context_type: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which side a conflict resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Incoming,
    Outgoing,
    Merged,
}

/// What happened to the outgoing candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    KeepOutgoing,
    RemoveOutgoing,
}

/// Record of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub context_type: String,
    pub strategy: String,
    pub winner: Winner,
    pub action: ResolutionAction,
    pub timestamp: Timestamp,
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub incoming: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub outgoing: usize,
    pub offline_delivered: usize,
    pub conflicts: usize,
    pub duration_ms: u64,
}

/// Result of a sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub device: DeviceId,
    /// Changes for the device to apply.
    pub changes: Vec<SyncChange>,
    pub outcomes: Vec<ChangeOutcome>,
    pub conflicts: Vec<ConflictResolution>,
    pub stats: SyncStats,
    /// Pass this back as `last_sync_timestamp` next time.
    pub sync_timestamp: Timestamp,
}

impl SyncResponse {
    /// Outgoing change for a type, if any.
    pub fn change_for(&self, context_type: &str) -> Option<&SyncChange> {
        self.changes.iter().find(|c| c.context_type == context_type)
    }
}
