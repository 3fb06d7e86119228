//! Port abstraction for the active and archive request tables.
//!
//! All reads and writes run inside a [`RequestTransaction`] so that callers
//! control commit boundaries. Savepoints let a multi-record operation undo
//! one record's changes without abandoning the rest.
//!
//! The port deliberately offers no way to remove archived rows, and removing
//! an active row requires an [`ArchiveToken`], which only the archiver can
//! mint after it has written and verified the archive copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::request::{
    ArchivedRequest, NewArchivedRequest, RequestDetails, RequestId, SampleRequest,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by request store adapters.
    pub enum RequestStoreError {
        /// Connection to the backing datastore failed.
        Connection {
            /// Driver or pool error.
            message: String,
        } => "request store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query {
            /// Database error.
            message: String,
        } => "request store query failed: {message}",
        /// A write collided with an existing row.
        Conflict {
            /// Which row collided.
            message: String,
        } => "request store conflict: {message}",
        /// A savepoint name was not found on the transaction.
        UnknownSavepoint {
            /// Requested savepoint.
            name: String,
        } => "unknown savepoint: {name}",
    }
}

/// Per-status counts of active requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Requests with status Outstanding.
    pub outstanding: u64,
    /// Requests with status In Progress.
    pub in_progress: u64,
    /// Requests with status Dispatched.
    pub dispatched: u64,
}

impl StatusCounts {
    /// Total active requests.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.outstanding + self.in_progress + self.dispatched
    }
}

/// Proof that an active request has a verified archive copy.
///
/// Only code inside this crate can construct one, and only the archiver
/// does so.
#[derive(Debug)]
pub struct ArchiveToken {
    original_id: RequestId,
}

impl ArchiveToken {
    pub(crate) fn issue(original_id: RequestId) -> Self {
        Self { original_id }
    }

    /// Request the token authorises removing from the active table.
    #[must_use]
    pub fn original_id(&self) -> RequestId {
        self.original_id
    }
}

/// Entry point to the request tables.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Run a trivial round trip to confirm the store responds.
    async fn ping(&self) -> Result<(), RequestStoreError>;

    /// Open a transaction. Dropping it without committing rolls back.
    async fn begin(&self) -> Result<Box<dyn RequestTransaction>, RequestStoreError>;
}

/// Transactional view of both request tables.
#[async_trait]
pub trait RequestTransaction: Send {
    /// All active requests ordered by id.
    async fn list_active(&mut self) -> Result<Vec<SampleRequest>, RequestStoreError>;

    /// All archived requests ordered by original id.
    async fn list_archived(&mut self) -> Result<Vec<ArchivedRequest>, RequestStoreError>;

    /// Ids of every active request.
    async fn active_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError>;

    /// Original ids of every archived request, including repeats.
    async fn archived_original_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError>;

    /// Count active requests by status.
    async fn count_by_status(&mut self) -> Result<StatusCounts, RequestStoreError>;

    /// Count archived rows.
    async fn count_archived(&mut self) -> Result<u64, RequestStoreError>;

    /// Count active dispatched requests whose dispatch date is before `cutoff`.
    async fn count_stale_dispatched(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RequestStoreError>;

    /// Touch both tables to confirm they are reachable.
    async fn probe_tables(&mut self) -> Result<(), RequestStoreError>;

    /// Fetch one active request.
    async fn find_active(
        &mut self,
        id: RequestId,
    ) -> Result<Option<SampleRequest>, RequestStoreError>;

    /// Fetch the archive row for a logical request.
    async fn find_archived(
        &mut self,
        original_id: RequestId,
    ) -> Result<Option<ArchivedRequest>, RequestStoreError>;

    /// Lock and return dispatched requests eligible for archiving at `cutoff`.
    async fn lock_archive_candidates(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SampleRequest>, RequestStoreError>;

    /// Insert a new active request and return it with its assigned id.
    async fn insert_request(
        &mut self,
        details: &RequestDetails,
    ) -> Result<SampleRequest, RequestStoreError>;

    /// Re-insert an active request under its original id.
    async fn restore_request(&mut self, request: &SampleRequest) -> Result<(), RequestStoreError>;

    /// Replace the fields of an active request. Returns `None` when absent.
    async fn update_request(
        &mut self,
        id: RequestId,
        details: &RequestDetails,
    ) -> Result<Option<SampleRequest>, RequestStoreError>;

    /// Write an archive row.
    async fn insert_archived(
        &mut self,
        row: &NewArchivedRequest,
    ) -> Result<ArchivedRequest, RequestStoreError>;

    /// Remove an active request covered by `token`. Returns whether a row
    /// was removed.
    async fn delete_active(&mut self, token: &ArchiveToken) -> Result<bool, RequestStoreError>;

    /// Mark a point the transaction can roll back to.
    async fn savepoint(&mut self, name: &str) -> Result<(), RequestStoreError>;

    /// Forget a savepoint, keeping its changes.
    async fn release_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError>;

    /// Discard changes made since the savepoint.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError>;

    /// Make all changes durable.
    async fn commit(self: Box<Self>) -> Result<(), RequestStoreError>;

    /// Discard all changes.
    async fn rollback(self: Box<Self>) -> Result<(), RequestStoreError>;
}
