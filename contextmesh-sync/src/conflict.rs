//! Conflict resolution strategies.
//!
//! A conflict exists when a sync session applied an incoming change for a
//! type and is also about to send an outgoing change for that type with a
//! different timestamp. Strategies decide which side wins and whether the
//! outgoing candidate is still sent.

use crate::change::{ResolutionAction, SyncChange, Winner};
use crate::error::SyncResult;
use async_trait::async_trait;
use contextmesh_fusion::{merge_contributions, Contribution};
use contextmesh_store::ContextStore;
use contextmesh_types::{ChangeOrigin, DeviceId, NewContext, Timestamp};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Source recorded on entries produced by the `merge` strategy.
pub const MERGE_SOURCE: &str = "sync-merge";

/// Both sides of a type-level conflict.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub device: DeviceId,
    pub context_type: String,
    pub incoming: SyncChange,
    pub outgoing: SyncChange,
    pub incoming_data: Value,
    pub outgoing_data: Value,
}

/// A strategy's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub winner: Winner,
    pub action: ResolutionAction,
}

impl Resolution {
    pub const fn new(winner: Winner, action: ResolutionAction) -> Self {
        Self { winner, action }
    }
}

/// A named conflict resolution function.
#[async_trait]
pub trait ConflictStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, conflict: &Conflict) -> SyncResult<Resolution>;
}

/// Newer timestamp wins. A newer incoming change removes the outgoing one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

#[async_trait]
impl ConflictStrategy for LastWriteWins {
    fn name(&self) -> &str {
        "last_write_wins"
    }

    async fn resolve(&self, conflict: &Conflict) -> SyncResult<Resolution> {
        Ok(if conflict.incoming.timestamp > conflict.outgoing.timestamp {
            Resolution::new(Winner::Incoming, ResolutionAction::RemoveOutgoing)
        } else {
            Resolution::new(Winner::Outgoing, ResolutionAction::KeepOutgoing)
        })
    }
}

/// The local side always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

#[async_trait]
impl ConflictStrategy for ServerWins {
    fn name(&self) -> &str {
        "server_wins"
    }

    async fn resolve(&self, _: &Conflict) -> SyncResult<Resolution> {
        Ok(Resolution::new(Winner::Outgoing, ResolutionAction::KeepOutgoing))
    }
}

/// The device always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

#[async_trait]
impl ConflictStrategy for ClientWins {
    fn name(&self) -> &str {
        "client_wins"
    }

    async fn resolve(&self, _: &Conflict) -> SyncResult<Resolution> {
        Ok(Resolution::new(Winner::Incoming, ResolutionAction::RemoveOutgoing))
    }
}

/// Shallow-merges incoming over outgoing and stores the result as a new
/// entry authored by [`MERGE_SOURCE`].
#[derive(Debug, Clone)]
pub struct MergeStrategy {
    store: Arc<ContextStore>,
}

impl MergeStrategy {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self { store }
    }
}

fn contribution(change: &SyncChange, data: &Value, fallback_source: &str) -> Contribution {
    Contribution {
        source: change
            .metadata
            .source
            .clone()
            .unwrap_or_else(|| fallback_source.to_string()),
        data: data.clone(),
        confidence: change.metadata.confidence.unwrap_or(0.0),
        timestamp: change.timestamp,
    }
}

#[async_trait]
impl ConflictStrategy for MergeStrategy {
    fn name(&self) -> &str {
        "merge"
    }

    async fn resolve(&self, conflict: &Conflict) -> SyncResult<Resolution> {
        let parts = [
            contribution(&conflict.outgoing, &conflict.outgoing_data, MERGE_SOURCE),
            contribution(&conflict.incoming, &conflict.incoming_data, conflict.device.as_str()),
        ];
        let Some(merged) = merge_contributions(&parts) else {
            return Ok(Resolution::new(Winner::Outgoing, ResolutionAction::KeepOutgoing));
        };

        let mut context = NewContext::new(MERGE_SOURCE, conflict.context_type.clone(), merged.data)
            .with_timestamp(merged.timestamp)
            .with_metadata("merged_from", Value::from(conflict.device.as_str()));
        if merged.confidence > 0.0 {
            context = context.with_confidence(merged.confidence);
        }
        if let Some(lifetime) = self.store.config().default_expiry() {
            let base = merged.timestamp.max(Timestamp::now());
            context = context.with_expiry(base.saturating_add(lifetime));
        }

        let entry = self
            .store
            .add_with_origin(context, ChangeOrigin::Sync(conflict.device.clone()))
            .await?;
        debug!(
            "Merged {} conflict from {} into {}",
            conflict.context_type, conflict.device, entry.id
        );
        Ok(Resolution::new(Winner::Merged, ResolutionAction::RemoveOutgoing))
    }
}
