//! Audit log stored as JSON lines.

use std::path::Path;

use crate::domain::audit::AuditEntry;
use crate::domain::ports::{AuditLog, JournalError};

use super::jsonl_log::JsonLinesLog;

/// [`AuditLog`] adapter over a bounded JSON-lines file.
pub struct FileAuditLog {
    log: JsonLinesLog<AuditEntry>,
}

impl FileAuditLog {
    /// Open (or create) `file_name` in `dir`, retaining at most
    /// `max_entries` entries.
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

impl AuditLog for FileAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), JournalError> {
        self.log.append(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, JournalError> {
        self.log.read_all()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::audit::{AuditOperation, AuditTable};
    use crate::domain::request::RequestId;
    use crate::test_support::cap_fs::{read_file_to_string, write_file};

    fn entry(id: i64) -> AuditEntry {
        let at = Utc
            .with_ymd_and_hms(2026, 2, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp");
        AuditEntry::new(
            at,
            AuditOperation::Insert,
            AuditTable::SampleRequest,
            RequestId::new(id),
            json!({ "id": id, "customer_name": "Ada" }),
        )
    }

    #[rstest]
    fn entries_survive_reopening_with_valid_checksums() {
        let dir = TempDir::new().expect("tempdir");
        let log = FileAuditLog::open(dir.path(), "audit.jsonl", 100).expect("open");
        log.append(&entry(1)).expect("append");
        log.append(&entry(2)).expect("append");
        drop(log);

        let reopened = FileAuditLog::open(dir.path(), "audit.jsonl", 100).expect("reopen");
        let entries = reopened.entries().expect("entries");
        assert_eq!(entries, vec![entry(1), entry(2)]);
        assert!(entries.iter().all(AuditEntry::checksum_matches));
    }

    #[rstest]
    fn corrupt_lines_do_not_hide_valid_entries() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let good = serde_json::to_string(&entry(7)).expect("encode");
        write_file(&path, format!("{{truncated\n{good}\n").as_bytes()).expect("seed");

        let log = FileAuditLog::open(dir.path(), "audit.jsonl", 100).expect("open");
        assert_eq!(log.entries().expect("entries"), vec![entry(7)]);

        log.append(&entry(8)).expect("append");
        let raw = read_file_to_string(&path).expect("raw");
        assert_eq!(raw.lines().count(), 3);
    }
}
