//! Access policy for sync sessions.
//!
//! Every incoming change is checked for `Write` and every outgoing type for
//! `Read` before the service touches the store.

use async_trait::async_trait;
use contextmesh_types::{DeviceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Operation being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOperation {
    Read,
    Write,
}

impl fmt::Display for AccessOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Decides whether a device may read or write a context type.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn check(
        &self,
        device: &DeviceId,
        operation: AccessOperation,
        context_type: &str,
    ) -> bool;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl AccessPolicy for AllowAllPolicy {
    async fn check(&self, _: &DeviceId, _: AccessOperation, _: &str) -> bool {
        true
    }
}

/// Role of a device under [`RoleAccessPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    Viewer,
    Editor,
    Admin,
}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Editor => write!(f, "editor"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Result of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allowed,
    Denied,
}

/// One recorded access decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub device: DeviceId,
    pub role: SyncRole,
    pub operation: AccessOperation,
    pub context_type: String,
    pub decision: AuditDecision,
    pub timestamp: Timestamp,
}

const AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct RoleTables {
    device_roles: HashMap<DeviceId, SyncRole>,
    operation_grants: HashMap<(AccessOperation, SyncRole), bool>,
    device_overrides: HashMap<(DeviceId, AccessOperation), bool>,
    type_roles: HashMap<(String, SyncRole), bool>,
}

/// Role-based policy.
///
/// Resolution order for a check:
/// 1. a per-device override for the operation, if set
/// 2. the role's grant for the operation (no grant denies)
/// 3. a per-type rule for the role, if set (no rule allows)
///
/// Devices without a role are viewers.
#[derive(Debug)]
pub struct RoleAccessPolicy {
    tables: RwLock<RoleTables>,
    audit: RwLock<VecDeque<AuditEntry>>,
}

impl Default for RoleAccessPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleAccessPolicy {
    /// Creates a policy where everyone may read and editors and admins may
    /// write.
    pub fn new() -> Self {
        let mut tables = RoleTables::default();
        for role in [SyncRole::Viewer, SyncRole::Editor, SyncRole::Admin] {
            tables
                .operation_grants
                .insert((AccessOperation::Read, role), true);
            tables
                .operation_grants
                .insert((AccessOperation::Write, role), role != SyncRole::Viewer);
        }
        Self {
            tables: RwLock::new(tables),
            audit: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn set_device_role(&self, device: DeviceId, role: SyncRole) {
        self.tables.write().await.device_roles.insert(device, role);
    }

    pub async fn device_role(&self, device: &DeviceId) -> SyncRole {
        self.tables
            .read()
            .await
            .device_roles
            .get(device)
            .copied()
            .unwrap_or(SyncRole::Viewer)
    }

    pub async fn set_operation_permission(
        &self,
        operation: AccessOperation,
        role: SyncRole,
        allowed: bool,
    ) {
        self.tables
            .write()
            .await
            .operation_grants
            .insert((operation, role), allowed);
    }

    pub async fn set_device_permission(
        &self,
        device: DeviceId,
        operation: AccessOperation,
        allowed: bool,
    ) {
        self.tables
            .write()
            .await
            .device_overrides
            .insert((device, operation), allowed);
    }

    pub async fn set_type_permission(
        &self,
        context_type: impl Into<String>,
        role: SyncRole,
        allowed: bool,
    ) {
        self.tables
            .write()
            .await
            .type_roles
            .insert((context_type.into(), role), allowed);
    }

    /// Recorded decisions for a device (or all), oldest first.
    pub async fn audit_log(&self, device: Option<&DeviceId>) -> Vec<AuditEntry> {
        self.audit
            .read()
            .await
            .iter()
            .filter(|entry| device.is_none_or(|d| &entry.device == d))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AccessPolicy for RoleAccessPolicy {
    async fn check(
        &self,
        device: &DeviceId,
        operation: AccessOperation,
        context_type: &str,
    ) -> bool {
        let (role, allowed) = {
            let tables = self.tables.read().await;
            let role = tables
                .device_roles
                .get(device)
                .copied()
                .unwrap_or(SyncRole::Viewer);
            let allowed = match tables.device_overrides.get(&(device.clone(), operation)) {
                Some(allowed) => *allowed,
                None => {
                    tables
                        .operation_grants
                        .get(&(operation, role))
                        .copied()
                        .unwrap_or(false)
                        && tables
                            .type_roles
                            .get(&(context_type.to_string(), role))
                            .copied()
                            .unwrap_or(true)
                }
            };
            (role, allowed)
        };

        debug!(
            "{} {} on {} by {} ({})",
            if allowed { "Allowed" } else { "Denied" },
            operation,
            context_type,
            device,
            role
        );
        let mut audit = self.audit.write().await;
        if audit.len() == AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(AuditEntry {
            device: device.clone(),
            role,
            operation,
            context_type: context_type.to_string(),
            decision: if allowed {
                AuditDecision::Allowed
            } else {
                AuditDecision::Denied
            },
            timestamp: Timestamp::now(),
        });
        allowed
    }
}
