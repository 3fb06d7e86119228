//! In-memory journals and snapshot storage.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::monitor::Alert;
use crate::domain::ports::{
    AlertSink, JournalError, OperationsJournal, SnapshotRepository, SnapshotRepositoryError,
};
use crate::domain::safeguards::OperationRecord;
use crate::domain::snapshot::BackupSnapshot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn newest<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items
        .get(items.len().saturating_sub(limit)..)
        .unwrap_or_default()
        .to_vec()
}

/// Operations journal kept in a vector.
#[derive(Debug, Default)]
pub struct MemoryOperationsJournal {
    records: Mutex<Vec<OperationRecord>>,
}

impl MemoryOperationsJournal {
    /// Everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        lock(&self.records).clone()
    }
}

impl OperationsJournal for MemoryOperationsJournal {
    fn append(&self, record: &OperationRecord) -> Result<(), JournalError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, JournalError> {
        Ok(newest(&lock(&self.records), limit))
    }
}

/// Alert sink kept in a vector.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    /// Every alert delivered so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn deliver(&self, alert: &Alert) -> Result<(), JournalError> {
        lock(&self.alerts).push(alert.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Alert>, JournalError> {
        Ok(newest(&lock(&self.alerts), limit))
    }
}

/// Snapshot repository keyed by file-style names.
#[derive(Debug, Default)]
pub struct MemorySnapshotRepository {
    snapshots: Mutex<BTreeMap<String, BackupSnapshot>>,
}

impl MemorySnapshotRepository {
    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.snapshots).len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.snapshots).is_empty()
    }
}

impl SnapshotRepository for MemorySnapshotRepository {
    fn save(&self, snapshot: &BackupSnapshot) -> Result<String, SnapshotRepositoryError> {
        let name = format!("backup_snapshot_{}.json", snapshot.backup_id);
        lock(&self.snapshots).insert(name.clone(), snapshot.clone());
        Ok(name)
    }

    fn load(&self, name: &str) -> Result<BackupSnapshot, SnapshotRepositoryError> {
        lock(&self.snapshots)
            .get(name)
            .cloned()
            .ok_or_else(|| SnapshotRepositoryError::not_found(name))
    }

    fn list(&self) -> Result<Vec<String>, SnapshotRepositoryError> {
        Ok(lock(&self.snapshots).keys().cloned().collect())
    }

    fn prune(&self, keep: usize) -> Result<Vec<String>, SnapshotRepositoryError> {
        let mut snapshots = lock(&self.snapshots);
        let surplus = snapshots.len().saturating_sub(keep);
        let removed: Vec<String> = snapshots.keys().take(surplus).cloned().collect();
        for name in &removed {
            snapshots.remove(name);
        }
        Ok(removed)
    }
}
