//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod alert_sink;
mod audit_log;
mod journal_error;
mod operations_journal;
mod request_store;
mod snapshot_repository;

#[cfg(test)]
pub use alert_sink::MockAlertSink;
pub use alert_sink::{AlertSink, FixtureAlertSink};
#[cfg(test)]
pub use audit_log::MockAuditLog;
pub use audit_log::{AuditLog, FixtureAuditLog};
pub use journal_error::JournalError;
#[cfg(test)]
pub use operations_journal::MockOperationsJournal;
pub use operations_journal::{FixtureOperationsJournal, OperationsJournal};
pub use request_store::{
    ArchiveToken, RequestStore, RequestStoreError, RequestTransaction, StatusCounts,
};
#[cfg(test)]
pub use snapshot_repository::MockSnapshotRepository;
pub use snapshot_repository::{SnapshotRepository, SnapshotRepositoryError};
