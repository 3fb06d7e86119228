//! Operations journal stored as JSON lines.

use std::path::Path;

use crate::domain::ports::{JournalError, OperationsJournal};
use crate::domain::safeguards::OperationRecord;

use super::jsonl_log::JsonLinesLog;

/// [`OperationsJournal`] adapter over a bounded JSON-lines file.
pub struct FileOperationsJournal {
    log: JsonLinesLog<OperationRecord>,
}

impl FileOperationsJournal {
    /// Open (or create) `file_name` in `dir`, retaining at most
    /// `max_entries` records.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open(dir: &Path, file_name: &str, max_entries: usize) -> Result<Self, JournalError> {
        Ok(Self {
            log: JsonLinesLog::open(dir, file_name, max_entries)?,
        })
    }
}

impl OperationsJournal for FileOperationsJournal {
    fn append(&self, record: &OperationRecord) -> Result<(), JournalError> {
        self.log.append(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, JournalError> {
        self.log.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::safeguards::SafeguardStage;

    fn record(status: &str) -> OperationRecord {
        OperationRecord {
            timestamp: Utc
                .with_ymd_and_hms(2026, 3, 1, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
            operation: SafeguardStage::PreOperationBackup,
            backup_id: "20260301_080000_000000_deadbeef".to_owned(),
            operation_type: "archive_dispatched_requests".to_owned(),
            status: status.to_owned(),
        }
    }

    #[rstest]
    fn retention_is_bounded() {
        let dir = TempDir::new().expect("tempdir");
        let journal = FileOperationsJournal::open(dir.path(), "ops.jsonl", 5).expect("open");
        for n in 0..20 {
            journal.append(&record(&format!("FAILED: attempt {n}"))).expect("append");
        }
        let all = journal.recent(usize::MAX).expect("recent");
        assert!(all.len() <= 6);
        assert_eq!(
            all.last().map(|r| r.status.as_str()),
            Some("FAILED: attempt 19")
        );
    }

    #[rstest]
    fn recent_returns_newest_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let journal = FileOperationsJournal::open(dir.path(), "ops.jsonl", 50).expect("open");
        for status in ["SUCCESS", "success", "issues_found"] {
            journal.append(&record(status)).expect("append");
        }
        let statuses: Vec<String> = journal
            .recent(2)
            .expect("recent")
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec!["success", "issues_found"]);
    }
}
