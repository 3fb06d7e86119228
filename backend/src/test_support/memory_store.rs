//! In-memory request store with real transaction semantics.
//!
//! One transaction runs at a time: `begin` takes an owned async lock and
//! works on a private copy of the tables, which `commit` publishes. Savepoints
//! are stacked copies. Faults can be injected per request to exercise the
//! archiver's per-record isolation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::ports::{
    ArchiveToken, RequestStore, RequestStoreError, RequestTransaction, StatusCounts,
};
use crate::domain::request::{
    ArchivedRequest, NewArchivedRequest, RequestDetails, RequestId, RequestStatus, SampleRequest,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    active: BTreeMap<RequestId, SampleRequest>,
    archived: Vec<ArchivedRequest>,
    next_archive_row: i64,
}

impl Tables {
    fn next_request_id(&self) -> RequestId {
        let highest_active = self.active.keys().map(|id| id.get()).max().unwrap_or(0);
        let highest_archived = self
            .archived
            .iter()
            .map(|row| row.original_id.get())
            .max()
            .unwrap_or(0);
        RequestId::new(highest_active.max(highest_archived) + 1)
    }

    fn push_archived(&mut self, row: &NewArchivedRequest) -> ArchivedRequest {
        self.next_archive_row += 1;
        let stored = ArchivedRequest {
            id: self.next_archive_row,
            original_id: row.original_id,
            date_archived: row.date_archived,
            details: row.details.clone(),
        };
        self.archived.push(stored.clone());
        stored
    }
}

#[derive(Debug, Default)]
struct Faults {
    archive_insert: BTreeSet<RequestId>,
    archive_readback: BTreeSet<RequestId>,
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    writer: Arc<AsyncMutex<()>>,
    reachable: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            tables: Mutex::default(),
            faults: Mutex::default(),
            writer: Arc::new(AsyncMutex::new(())),
            reachable: AtomicBool::new(true),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shareable in-memory implementation of [`RequestStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRequestStore {
    shared: Arc<Shared>,
}

impl InMemoryRequestStore {
    /// Insert an active request directly, bypassing transactions.
    pub fn seed_active(&self, request: SampleRequest) {
        lock(&self.shared.tables)
            .active
            .insert(request.id, request);
    }

    /// Insert an archive row directly, bypassing transactions and the
    /// archive workflow.
    pub fn seed_archived(&self, row: NewArchivedRequest) -> ArchivedRequest {
        lock(&self.shared.tables).push_archived(&row)
    }

    /// Committed active requests ordered by id.
    #[must_use]
    pub fn active(&self) -> Vec<SampleRequest> {
        lock(&self.shared.tables).active.values().cloned().collect()
    }

    /// Committed archive rows in insertion order.
    #[must_use]
    pub fn archived(&self) -> Vec<ArchivedRequest> {
        lock(&self.shared.tables).archived.clone()
    }

    /// Remove an active request outside any workflow, as lost data would be.
    pub fn lose_active(&self, id: RequestId) -> Option<SampleRequest> {
        lock(&self.shared.tables).active.remove(&id)
    }

    /// Make inserting the archive copy of `id` fail.
    pub fn inject_archive_failure(&self, id: RequestId) {
        lock(&self.shared.faults).archive_insert.insert(id);
    }

    /// Make the archive copy of `id` unreadable after it is written.
    pub fn inject_archive_readback_failure(&self, id: RequestId) {
        lock(&self.shared.faults).archive_readback.insert(id);
    }

    /// Toggle whether the store answers at all.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), RequestStoreError> {
        ensure_reachable(&self.shared)
    }
}

fn ensure_reachable(shared: &Shared) -> Result<(), RequestStoreError> {
    if shared.reachable.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(RequestStoreError::connection("in-memory store unreachable"))
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn ping(&self) -> Result<(), RequestStoreError> {
        self.ensure_reachable()
    }

    async fn begin(&self) -> Result<Box<dyn RequestTransaction>, RequestStoreError> {
        self.ensure_reachable()?;
        let guard = Arc::clone(&self.shared.writer).lock_owned().await;
        let working = lock(&self.shared.tables).clone();
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            _guard: guard,
            working,
            savepoints: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    shared: Arc<Shared>,
    _guard: OwnedMutexGuard<()>,
    working: Tables,
    savepoints: Vec<(String, Tables)>,
}

impl InMemoryTransaction {
    fn check(&self) -> Result<(), RequestStoreError> {
        ensure_reachable(&self.shared)
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, RequestStoreError> {
        self.savepoints
            .iter()
            .rposition(|(existing, _)| existing == name)
            .ok_or_else(|| RequestStoreError::unknown_savepoint(name))
    }
}

#[async_trait]
impl RequestTransaction for InMemoryTransaction {
    async fn list_active(&mut self) -> Result<Vec<SampleRequest>, RequestStoreError> {
        self.check()?;
        Ok(self.working.active.values().cloned().collect())
    }

    async fn list_archived(&mut self) -> Result<Vec<ArchivedRequest>, RequestStoreError> {
        self.check()?;
        let mut rows = self.working.archived.clone();
        rows.sort_by_key(|row| (row.original_id, row.id));
        Ok(rows)
    }

    async fn active_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError> {
        self.check()?;
        Ok(self.working.active.keys().copied().collect())
    }

    async fn archived_original_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError> {
        self.check()?;
        Ok(self
            .working
            .archived
            .iter()
            .map(|row| row.original_id)
            .collect())
    }

    async fn count_by_status(&mut self) -> Result<StatusCounts, RequestStoreError> {
        self.check()?;
        let mut counts = StatusCounts::default();
        for request in self.working.active.values() {
            match request.details.status {
                RequestStatus::Outstanding => counts.outstanding += 1,
                RequestStatus::InProgress => counts.in_progress += 1,
                RequestStatus::Dispatched => counts.dispatched += 1,
            }
        }
        Ok(counts)
    }

    async fn count_archived(&mut self) -> Result<u64, RequestStoreError> {
        self.check()?;
        Ok(self.working.archived.len() as u64)
    }

    async fn count_stale_dispatched(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RequestStoreError> {
        self.check()?;
        Ok(self
            .working
            .active
            .values()
            .filter(|request| request.is_archivable(cutoff))
            .count() as u64)
    }

    async fn probe_tables(&mut self) -> Result<(), RequestStoreError> {
        self.check()
    }

    async fn find_active(
        &mut self,
        id: RequestId,
    ) -> Result<Option<SampleRequest>, RequestStoreError> {
        self.check()?;
        Ok(self.working.active.get(&id).cloned())
    }

    async fn find_archived(
        &mut self,
        original_id: RequestId,
    ) -> Result<Option<ArchivedRequest>, RequestStoreError> {
        self.check()?;
        if lock(&self.shared.faults)
            .archive_readback
            .contains(&original_id)
        {
            return Ok(None);
        }
        Ok(self
            .working
            .archived
            .iter()
            .find(|row| row.original_id == original_id)
            .cloned())
    }

    async fn lock_archive_candidates(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SampleRequest>, RequestStoreError> {
        self.check()?;
        Ok(self
            .working
            .active
            .values()
            .filter(|request| request.is_archivable(cutoff))
            .cloned()
            .collect())
    }

    async fn insert_request(
        &mut self,
        details: &RequestDetails,
    ) -> Result<SampleRequest, RequestStoreError> {
        self.check()?;
        let request = SampleRequest {
            id: self.working.next_request_id(),
            details: details.clone(),
        };
        self.working.active.insert(request.id, request.clone());
        Ok(request)
    }

    async fn restore_request(&mut self, request: &SampleRequest) -> Result<(), RequestStoreError> {
        self.check()?;
        if self.working.active.contains_key(&request.id) {
            return Err(RequestStoreError::conflict(format!(
                "request {} already active",
                request.id
            )));
        }
        self.working.active.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_request(
        &mut self,
        id: RequestId,
        details: &RequestDetails,
    ) -> Result<Option<SampleRequest>, RequestStoreError> {
        self.check()?;
        Ok(self.working.active.get_mut(&id).map(|request| {
            request.details = details.clone();
            request.clone()
        }))
    }

    async fn insert_archived(
        &mut self,
        row: &NewArchivedRequest,
    ) -> Result<ArchivedRequest, RequestStoreError> {
        self.check()?;
        if lock(&self.shared.faults)
            .archive_insert
            .contains(&row.original_id)
        {
            return Err(RequestStoreError::query(format!(
                "injected archive failure for {}",
                row.original_id
            )));
        }
        if self
            .working
            .archived
            .iter()
            .any(|existing| existing.original_id == row.original_id)
        {
            return Err(RequestStoreError::conflict(format!(
                "request {} already archived",
                row.original_id
            )));
        }
        Ok(self.working.push_archived(row))
    }

    async fn delete_active(&mut self, token: &ArchiveToken) -> Result<bool, RequestStoreError> {
        self.check()?;
        Ok(self.working.active.remove(&token.original_id()).is_some())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        self.check()?;
        self.savepoints
            .push((name.to_owned(), self.working.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        if let Some((_, tables)) = self.savepoints.last() {
            self.working = tables.clone();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RequestStoreError> {
        self.check()?;
        *lock(&self.shared.tables) = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RequestStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Transaction semantics of the in-memory store.
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::requests::{dispatched_request, request_details};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[rstest]
    #[tokio::test]
    async fn uncommitted_writes_are_discarded(now: DateTime<Utc>) {
        let store = InMemoryRequestStore::default();
        let mut tx = store.begin().await.expect("begin");
        tx.insert_request(&request_details("Ada", now))
            .await
            .expect("insert");
        tx.rollback().await.expect("rollback");

        assert!(store.active().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn savepoints_undo_only_later_writes(now: DateTime<Utc>) {
        let store = InMemoryRequestStore::default();
        let mut tx = store.begin().await.expect("begin");
        let first = tx
            .insert_request(&request_details("Ada", now))
            .await
            .expect("insert");
        tx.savepoint("second").await.expect("savepoint");
        tx.insert_request(&request_details("Grace", now))
            .await
            .expect("insert");
        tx.rollback_to_savepoint("second").await.expect("rollback to");
        tx.release_savepoint("second").await.expect("release");
        tx.commit().await.expect("commit");

        let active = store.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_savepoint_is_an_error() {
        let store = InMemoryRequestStore::default();
        let mut tx = store.begin().await.expect("begin");
        let err = tx
            .rollback_to_savepoint("missing")
            .await
            .expect_err("unknown savepoint");
        assert_eq!(err, RequestStoreError::unknown_savepoint("missing"));
    }

    #[rstest]
    #[tokio::test]
    async fn new_ids_skip_archived_originals(now: DateTime<Utc>) {
        let store = InMemoryRequestStore::default();
        let request = dispatched_request(4, now);
        store.seed_archived(NewArchivedRequest {
            original_id: request.id,
            date_archived: now,
            details: request.details,
        });

        let mut tx = store.begin().await.expect("begin");
        let inserted = tx
            .insert_request(&request_details("Ada", now))
            .await
            .expect("insert");
        assert_eq!(inserted.id, RequestId::new(5));
    }
}
