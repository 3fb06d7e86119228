//! Port abstraction for persisting backup snapshots.

use crate::domain::snapshot::BackupSnapshot;

use super::define_port_error;

define_port_error! {
    /// Errors raised by snapshot storage adapters.
    pub enum SnapshotRepositoryError {
        /// Reading or writing the snapshot location failed.
        Io {
            /// Underlying I/O error.
            message: String,
        } => "snapshot storage failed: {message}",
        /// The snapshot could not be encoded or decoded.
        Format {
            /// Encoder or decoder error.
            message: String,
        } => "snapshot format invalid: {message}",
        /// No snapshot exists under the given name.
        NotFound {
            /// Requested snapshot name.
            name: String,
        } => "snapshot not found: {name}",
    }
}

/// Durable storage for point-in-time snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotRepository: Send + Sync {
    /// Persist a snapshot and return the name it was stored under.
    fn save(&self, snapshot: &BackupSnapshot) -> Result<String, SnapshotRepositoryError>;

    /// Load a snapshot by stored name.
    fn load(&self, name: &str) -> Result<BackupSnapshot, SnapshotRepositoryError>;

    /// Stored snapshot names, oldest first.
    fn list(&self) -> Result<Vec<String>, SnapshotRepositoryError>;

    /// Delete all but the newest `keep` snapshots and return the removed
    /// names.
    fn prune(&self, keep: usize) -> Result<Vec<String>, SnapshotRepositoryError>;
}
