//! Context store for contextmesh.
//!
//! Holds every context entry in memory behind one lock domain, expires them
//! lazily on read and eagerly on the pruning timer, evicts low-confidence
//! entries past the size cap, and writes (optionally encrypted) whole-file
//! snapshots. Every change is published on a broadcast bus that fusion,
//! prioritization and sync consume independently.

mod bus;
mod config;
mod error;
mod query;
mod snapshot;
mod store;
mod task;

pub use bus::{ChangeBus, ChangeSubscription};
pub use config::{KeySource, PersistenceConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use query::{type_matches, ContextQuery, SortField, SortOrder};
pub use snapshot::{SnapshotStats, Snapshotter};
pub use store::{ContextStore, PruneReport, StoreStats, UpdateOptions, PROTECTED_PRIORITY};
pub use task::TaskHandle;
