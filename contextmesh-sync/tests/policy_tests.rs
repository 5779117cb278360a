//! Tests for the role-based access policy and the built-in conflict strategies.

use contextmesh_store::{ContextStore, StoreConfig};
use contextmesh_sync::{
    AccessOperation, AccessPolicy, AllowAllPolicy, AuditDecision, ClientWins, Conflict,
    ConflictStrategy, LastWriteWins, MergeStrategy, ResolutionAction, RoleAccessPolicy,
    ServerWins, SyncChange, SyncRole, Winner,
};
use contextmesh_types::{DeviceId, Timestamp};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn dev(id: &str) -> DeviceId {
    DeviceId::new(id)
}

#[tokio::test]
async fn allow_all_allows() {
    assert!(
        AllowAllPolicy
            .check(&dev("any"), AccessOperation::Write, "secret.keys")
            .await
    );
}

#[tokio::test]
async fn unknown_devices_are_viewers() {
    let policy = RoleAccessPolicy::new();
    assert_eq!(policy.device_role(&dev("dev1")).await, SyncRole::Viewer);
    assert!(policy.check(&dev("dev1"), AccessOperation::Read, "ui.focus").await);
    assert!(!policy.check(&dev("dev1"), AccessOperation::Write, "ui.focus").await);
}

#[tokio::test]
async fn editors_write_unless_type_forbids() {
    let policy = RoleAccessPolicy::new();
    policy.set_device_role(dev("dev1"), SyncRole::Editor).await;
    assert!(policy.check(&dev("dev1"), AccessOperation::Write, "ui.focus").await);

    policy
        .set_type_permission("secret.keys", SyncRole::Editor, false)
        .await;
    assert!(!policy.check(&dev("dev1"), AccessOperation::Write, "secret.keys").await);
    assert!(!policy.check(&dev("dev1"), AccessOperation::Read, "secret.keys").await);
}

#[tokio::test]
async fn revoked_operation_grant_denies() {
    let policy = RoleAccessPolicy::new();
    policy
        .set_operation_permission(AccessOperation::Read, SyncRole::Viewer, false)
        .await;
    assert!(!policy.check(&dev("dev1"), AccessOperation::Read, "ui.focus").await);
}

#[tokio::test]
async fn device_override_beats_role() {
    let policy = RoleAccessPolicy::new();
    policy
        .set_device_permission(dev("kiosk"), AccessOperation::Write, true)
        .await;
    policy
        .set_type_permission("ui.focus", SyncRole::Viewer, false)
        .await;
    assert!(policy.check(&dev("kiosk"), AccessOperation::Write, "ui.focus").await);

    policy.set_device_role(dev("admin"), SyncRole::Admin).await;
    policy
        .set_device_permission(dev("admin"), AccessOperation::Read, false)
        .await;
    assert!(!policy.check(&dev("admin"), AccessOperation::Read, "ui.focus").await);
}

#[tokio::test]
async fn decisions_are_audited() {
    let policy = RoleAccessPolicy::new();
    policy.check(&dev("dev1"), AccessOperation::Read, "ui.focus").await;
    policy.check(&dev("dev1"), AccessOperation::Write, "ui.focus").await;
    policy.check(&dev("dev2"), AccessOperation::Read, "ui.focus").await;

    let log = policy.audit_log(Some(&dev("dev1"))).await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].decision, AuditDecision::Allowed);
    assert_eq!(log[1].decision, AuditDecision::Denied);
    assert_eq!(log[1].operation, AccessOperation::Write);
    assert_eq!(log[1].role, SyncRole::Viewer);
    assert_eq!(policy.audit_log(None).await.len(), 3);
}

fn conflict(incoming_ts: u64, outgoing_ts: u64) -> Conflict {
    Conflict {
        device: dev("dev1"),
        context_type: "ui.focus".to_string(),
        incoming: SyncChange::new("in", "ui.focus", json!({"b": 2}), Timestamp::from_millis(incoming_ts)),
        outgoing: SyncChange::new("out", "ui.focus", json!({"a": 1}), Timestamp::from_millis(outgoing_ts)),
        incoming_data: json!({"b": 2}),
        outgoing_data: json!({"a": 1}),
    }
}

#[tokio::test]
async fn fixed_side_strategies() {
    let c = conflict(10, 20);
    let server = ServerWins.resolve(&c).await.unwrap();
    assert_eq!(server.winner, Winner::Outgoing);
    assert_eq!(server.action, ResolutionAction::KeepOutgoing);
    let client = ClientWins.resolve(&c).await.unwrap();
    assert_eq!(client.winner, Winner::Incoming);
    assert_eq!(client.action, ResolutionAction::RemoveOutgoing);
}

#[tokio::test]
async fn merge_publishes_a_new_entry() {
    let store = Arc::new(ContextStore::new(StoreConfig::default()).unwrap());
    let strategy = MergeStrategy::new(Arc::clone(&store));
    let mut events = store.subscribe();

    let resolution = strategy.resolve(&conflict(100, 50)).await.unwrap();
    assert_eq!(resolution.winner, Winner::Merged);
    assert_eq!(resolution.action, ResolutionAction::RemoveOutgoing);

    let event = events.try_next().unwrap();
    assert!(event.origin.is_sync());
    assert_eq!(event.entry.data, json!({"a": 1, "b": 2}));
    assert_eq!(event.entry.source, "sync-merge");
    assert_eq!(store.len().await, 1);
}

proptest! {
    #[test]
    fn last_write_wins_picks_the_newer_side(incoming in 0u64..1_000, outgoing in 0u64..1_000) {
        prop_assume!(incoming != outgoing);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let resolution = rt.block_on(LastWriteWins.resolve(&conflict(incoming, outgoing))).unwrap();
        if incoming > outgoing {
            prop_assert_eq!(resolution.winner, Winner::Incoming);
            prop_assert_eq!(resolution.action, ResolutionAction::RemoveOutgoing);
        } else {
            prop_assert_eq!(resolution.winner, Winner::Outgoing);
            prop_assert_eq!(resolution.action, ResolutionAction::KeepOutgoing);
        }
    }
}
