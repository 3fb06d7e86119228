//! The small set of mutations that feed the audit trail.
//!
//! Requests enter through [`RequestLedger::submit`] and change through
//! status and supplier updates. They leave the active table only through the
//! archiver; the deletion entry points here exist to refuse.

use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use tracing::{error, info};

use crate::domain::RetentionError;
use crate::domain::audit::{AuditOperation, AuditTable, AuditTrail};
use crate::domain::ports::RequestStore;
use crate::domain::request::{RequestDetails, RequestDraft, RequestId, RequestStatus, SampleRequest};

/// Where a logical request currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestLocation {
    /// In the active table.
    Active,
    /// In the archive table.
    Archived,
    /// Absent from both tables but present in the audit trail.
    AuditOnly,
    /// Unknown to the store and the audit trail.
    Nowhere,
}

/// Validated, audited writes to the active table.
#[derive(Clone)]
pub struct RequestLedger {
    store: Arc<dyn RequestStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

impl RequestLedger {
    /// Create a ledger writing through `store` and auditing to `audit`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, audit: AuditTrail, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Validate and store a new outstanding request.
    ///
    /// # Errors
    ///
    /// [`RetentionError::Validation`] for a malformed draft, otherwise store
    /// failures.
    pub async fn submit(&self, draft: RequestDraft) -> Result<SampleRequest, RetentionError> {
        let details = draft.into_details(self.clock.utc())?;
        let mut tx = self.store.begin().await?;
        let request = tx.insert_request(&details).await?;
        tx.commit().await?;

        self.audit.record(
            AuditOperation::Insert,
            AuditTable::SampleRequest,
            request.id,
            &request,
        );
        info!(record_id = %request.id, "sample request submitted");
        Ok(request)
    }

    /// Move a request to `status`, keeping the dispatch date in step.
    pub async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<SampleRequest, RetentionError> {
        let now = self.clock.utc();
        let updated = self
            .modify(id, |details| details.apply_status(status, now))
            .await?;
        info!(record_id = %id, %status, "request status updated");
        Ok(updated)
    }

    /// Record that the supplier was emailed about the request.
    pub async fn mark_supplier_notified(&self, id: RequestId) -> Result<SampleRequest, RetentionError> {
        let now = self.clock.utc();
        self.modify(id, |details| {
            details.supplier_notified = true;
            details.supplier_notified_at = Some(now);
        })
        .await
    }

    async fn modify(
        &self,
        id: RequestId,
        change: impl FnOnce(&mut RequestDetails) + Send,
    ) -> Result<SampleRequest, RetentionError> {
        let mut tx = self.store.begin().await?;
        let Some(mut current) = tx.find_active(id).await? else {
            let archived = tx.find_archived(id).await?.is_some();
            tx.rollback().await?;
            if archived {
                error!(record_id = %id, "rejected modification of archived request");
                return Err(RetentionError::ArchivedRecordImmutable { id });
            }
            return Err(RetentionError::NotFound { id });
        };
        change(&mut current.details);
        let updated = tx
            .update_request(id, &current.details)
            .await?
            .ok_or(RetentionError::NotFound { id })?;
        tx.commit().await?;

        self.audit.record(
            AuditOperation::Update,
            AuditTable::SampleRequest,
            id,
            &updated,
        );
        Ok(updated)
    }

    /// Find which table, if any, holds the request.
    pub async fn locate(&self, id: RequestId) -> Result<RequestLocation, RetentionError> {
        let mut tx = self.store.begin().await?;
        let found = async {
            if tx.find_active(id).await?.is_some() {
                return Ok(Some(RequestLocation::Active));
            }
            Ok::<_, RetentionError>(
                tx.find_archived(id)
                    .await?
                    .map(|_| RequestLocation::Archived),
            )
        }
        .await;
        tx.rollback().await?;

        Ok(match found? {
            Some(location) => location,
            None if self.audit.logged_request_ids().contains(&id) => RequestLocation::AuditOnly,
            None => RequestLocation::Nowhere,
        })
    }

    /// Always refused: active requests leave only by being archived.
    pub fn delete_request(&self, id: RequestId) -> Result<(), RetentionError> {
        error!(record_id = %id, "rejected deletion of active request");
        Err(RetentionError::UnauthorizedDeletion { id })
    }

    /// Always refused: archived requests are immutable.
    pub fn delete_archived(&self, original_id: RequestId) -> Result<(), RetentionError> {
        error!(record_id = %original_id, "rejected deletion of archived request");
        Err(RetentionError::ArchivedRecordImmutable { id: original_id })
    }
}
