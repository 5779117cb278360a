//! Multi-device sync for contextmesh.
//!
//! Devices register with the [`SyncService`] and then run sync sessions:
//! they push their changes, receive the latest local entry of each type they
//! have not seen, and have type-level conflicts settled by a named
//! [`ConflictStrategy`]. Changes made while a device is offline wait in a
//! bounded per-device queue. Every read and write is checked against an
//! [`AccessPolicy`].

mod change;
mod codec;
mod config;
mod conflict;
mod device;
mod error;
mod offline;
mod policy;
mod service;

pub use change::{
    ChangeMetadata, ChangeOutcome, ChangeStatus, ConflictResolution, ResolutionAction,
    SyncChange, SyncOptions, SyncPayload, SyncRequest, SyncResponse, SyncStats, Winner,
};
pub use codec::{compress_value, decompress_value};
pub use config::SyncServiceConfig;
pub use conflict::{
    ClientWins, Conflict, ConflictStrategy, LastWriteWins, MergeStrategy, Resolution, ServerWins,
    MERGE_SOURCE,
};
pub use device::{DeviceCapabilities, DeviceRecord, DeviceRegistration, DeviceStatus};
pub use error::{SyncError, SyncResult};
pub use offline::{OfflineFilter, QueueDirection};
pub use policy::{
    AccessOperation, AccessPolicy, AllowAllPolicy, AuditDecision, AuditEntry, RoleAccessPolicy,
    SyncRole,
};
pub use service::{BackgroundReport, DeviceStatusReport, SyncRecord, SyncService, SyncStatus};
