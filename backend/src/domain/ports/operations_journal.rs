//! Port abstraction for the bounded log of safeguarded operations.

use crate::domain::safeguards::OperationRecord;

use super::JournalError;

/// Records every backup and verification attempt with its outcome.
#[cfg_attr(test, mockall::automock)]
pub trait OperationsJournal: Send + Sync {
    /// Append one record.
    fn append(&self, record: &OperationRecord) -> Result<(), JournalError>;

    /// Up to `limit` of the newest records, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, JournalError>;
}

/// Fixture implementation that discards writes.
#[derive(Debug, Clone, Default)]
pub struct FixtureOperationsJournal;

impl OperationsJournal for FixtureOperationsJournal {
    fn append(&self, _record: &OperationRecord) -> Result<(), JournalError> {
        Ok(())
    }

    fn recent(&self, _limit: usize) -> Result<Vec<OperationRecord>, JournalError> {
        Ok(Vec::new())
    }
}
