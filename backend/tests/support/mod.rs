//! Shared harness for the retention integration tests.
//!
//! Services run against the in-memory request store and the real file
//! adapters rooted in a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use mockable::Clock;
use sample_retention::domain::monitor::MonitorSettings;
use sample_retention::domain::safeguards::OperationRecord;
use sample_retention::domain::ports::OperationsJournal;
use sample_retention::domain::{RetentionOptions, RetentionPorts, RetentionServices};
use sample_retention::outbound::journal::{FileAlertLog, FileAuditLog, FileOperationsJournal};
use sample_retention::outbound::snapshots::FileSnapshotRepository;
use sample_retention::test_support::{InMemoryRequestStore, MutableClock};
use tempfile::TempDir;

pub const AUDIT_FILE: &str = "data_audit_log.jsonl";
pub const OPERATIONS_FILE: &str = "backup_operations_log.jsonl";
pub const ALERT_FILE: &str = "database_alerts.jsonl";

/// Fixed starting instant for every scenario.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub struct Harness {
    pub dir: TempDir,
    pub store: InMemoryRequestStore,
    pub clock: Arc<MutableClock>,
    pub services: RetentionServices,
}

impl Harness {
    /// Fresh harness over an empty temporary directory.
    pub fn new() -> Self {
        Self::in_dir(TempDir::new().expect("tempdir"), MonitorSettings::default())
    }

    /// Harness over `dir`, which may already hold journal files.
    pub fn in_dir(dir: TempDir, monitor: MonitorSettings) -> Self {
        let store = InMemoryRequestStore::default();
        let clock = Arc::new(MutableClock::new(start()));
        let ports = RetentionPorts {
            store: Arc::new(store.clone()),
            audit_log: Arc::new(
                FileAuditLog::open(dir.path(), AUDIT_FILE, 10_000).expect("audit log"),
            ),
            operations: Arc::new(
                FileOperationsJournal::open(dir.path(), OPERATIONS_FILE, 1_000)
                    .expect("operations journal"),
            ),
            snapshots: Arc::new(
                FileSnapshotRepository::open(&dir.path().join("backups")).expect("snapshots"),
            ),
            alerts: Arc::new(FileAlertLog::open(dir.path(), ALERT_FILE, 100).expect("alert log")),
        };
        let options = RetentionOptions {
            monitor,
            ..RetentionOptions::default()
        };
        let shared_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let services = RetentionServices::new(ports, shared_clock, options);
        Self {
            dir,
            store,
            clock,
            services,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// Operations journal contents as read back from disk.
    pub fn operations(&self) -> Vec<OperationRecord> {
        FileOperationsJournal::open(self.path(), OPERATIONS_FILE, 1_000)
            .expect("reopen operations journal")
            .recent(usize::MAX)
            .expect("read operations journal")
    }
}
