//! Port abstraction for the durable audit log.

use crate::domain::audit::AuditEntry;

use super::JournalError;

/// Append-only storage for audit entries.
///
/// Adapters keep at most a configured number of the newest entries.
#[cfg_attr(test, mockall::automock)]
pub trait AuditLog: Send + Sync {
    /// Append one entry.
    fn append(&self, entry: &AuditEntry) -> Result<(), JournalError>;

    /// Every retained entry, oldest first. Unreadable records are skipped.
    fn entries(&self) -> Result<Vec<AuditEntry>, JournalError>;
}

/// Fixture implementation that discards writes and reports no history.
#[derive(Debug, Clone, Default)]
pub struct FixtureAuditLog;

impl AuditLog for FixtureAuditLog {
    fn append(&self, _entry: &AuditEntry) -> Result<(), JournalError> {
        Ok(())
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, JournalError> {
        Ok(Vec::new())
    }
}
