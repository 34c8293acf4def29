//! Snapshot persistence
//!
//! Periodic, versioned snapshots of the engine state with retention and a
//! fail-open restore at startup.

pub mod controller;
pub mod snapshot;
pub mod store;

pub use controller::{BackupController, RestoreOutcome, SnapshotOutcome};
pub use snapshot::{BackupSnapshot, SnapshotInfo, SNAPSHOT_FORMAT_VERSION};
pub use store::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};

use crate::config::{BackupBackend, BackupSettings};
use std::sync::Arc;

/// Build the store selected in the configuration
pub fn store_from_settings(settings: &BackupSettings) -> Arc<dyn SnapshotStore> {
    match settings.backend {
        BackupBackend::File => Arc::new(FileSnapshotStore::new(settings.directory.clone())),
        BackupBackend::Memory => Arc::new(InMemorySnapshotStore::new()),
    }
}
