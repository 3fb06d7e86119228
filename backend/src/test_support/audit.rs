//! In-memory audit log.

use std::sync::{Mutex, PoisonError};

use crate::domain::audit::AuditEntry;
use crate::domain::ports::{AuditLog, JournalError};

/// Audit log kept in a vector, for asserting on what was recorded.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Start from an existing history.
    #[must_use]
    pub fn with_entries(entries: Vec<AuditEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), JournalError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, JournalError> {
        Ok(self.snapshot())
    }
}
