//! Device registry records.

use contextmesh_types::{DeviceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a device is currently reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Active,
    Offline,
}

/// What a device declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    /// Per-type sync priority; higher values are sent first.
    pub type_priorities: BTreeMap<String, i32>,
    /// Accepts compressed payloads.
    pub compression: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            type_priorities: BTreeMap::new(),
            compression: true,
        }
    }
}

/// Input to `SyncService::register_device`. Unset fields keep their
/// current value when the device is already known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<DeviceCapabilities>,
}

impl DeviceRegistration {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            capabilities: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub capabilities: DeviceCapabilities,
    pub status: DeviceStatus,
    pub registered_at: Timestamp,
    pub last_seen: Timestamp,
    pub last_sync: Option<Timestamp>,
    pub sync_count: u64,
    /// Re-registrations after the first.
    pub update_count: u64,
}

impl DeviceRecord {
    pub(crate) fn register(registration: DeviceRegistration, now: Timestamp) -> Self {
        Self {
            name: registration
                .name
                .unwrap_or_else(|| registration.id.to_string()),
            id: registration.id,
            capabilities: registration.capabilities.unwrap_or_default(),
            status: DeviceStatus::Active,
            registered_at: now,
            last_seen: now,
            last_sync: None,
            sync_count: 0,
            update_count: 0,
        }
    }

    pub(crate) fn merge(&mut self, registration: DeviceRegistration, now: Timestamp) {
        if let Some(name) = registration.name {
            self.name = name;
        }
        if let Some(capabilities) = registration.capabilities {
            self.capabilities = capabilities;
        }
        self.status = DeviceStatus::Active;
        self.last_seen = now;
        self.update_count += 1;
    }

    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    /// Declared priority of a type, if any.
    pub fn type_priority(&self, context_type: &str) -> Option<i32> {
        self.capabilities.type_priorities.get(context_type).copied()
    }
}
