//! Moves old dispatched requests from the active table to the archive.
//!
//! The batch runs in one transaction with the candidate rows locked. Each
//! record is moved behind its own savepoint: the archive copy is written,
//! read back and compared before the active row is deleted, and any failure
//! undoes only that record. When at least one record moved, an integrity
//! check runs inside the same transaction; anything short of healthy rolls
//! the whole batch back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::RetentionError;
use crate::domain::audit::{AuditOperation, AuditTable, AuditTrail};
use crate::domain::integrity::{
    IntegrityChecker, IntegrityIssue, IntegrityReport, Reconciliation, archive_cutoff,
};
use crate::domain::ports::{ArchiveToken, RequestStore, RequestStoreError, RequestTransaction};
use crate::domain::request::{
    ArchiveEligibilityError, NewArchivedRequest, RequestId, SampleRequest,
};

/// Default retention period before dispatched requests are archived.
pub const DEFAULT_MONTHS_BEFORE_ARCHIVE: u32 = 4;

/// Result of an archive run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveOutcome {
    /// Requests moved and committed; zero when the batch rolled back.
    pub archived_count: usize,
    /// Requests that failed individually and stayed active.
    pub failed_ids: Vec<RequestId>,
    /// Whether the integrity gate undid the batch.
    pub rolled_back: bool,
    /// Integrity report from the gate, when it ran.
    pub gate: Option<IntegrityReport>,
}

/// Why a single record could not be archived.
#[derive(Debug, thiserror::Error)]
enum RecordFailure {
    #[error("request is no longer active")]
    Vanished,
    #[error(transparent)]
    Ineligible(#[from] ArchiveEligibilityError),
    #[error("archive copy could not be read back")]
    CopyMissing,
    #[error("archive copy differs from the active row")]
    CopyMismatch,
    #[error("active row was already gone at delete")]
    DeleteMissed,
    #[error(transparent)]
    Store(#[from] RequestStoreError),
}

/// Archives dispatched requests past the retention cutoff.
#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn RequestStore>,
    audit: AuditTrail,
    integrity: IntegrityChecker,
    clock: Arc<dyn Clock>,
}

impl Archiver {
    /// Create an archiver.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        audit: AuditTrail,
        integrity: IntegrityChecker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            integrity,
            clock,
        }
    }

    /// Archive requests dispatched more than `months_before_archive` months
    /// (of thirty days) ago.
    ///
    /// # Errors
    ///
    /// Fails only when the transaction cannot be opened, the candidates
    /// cannot be selected, or the final commit or rollback fails. Per-record
    /// failures are reported in [`ArchiveOutcome::failed_ids`].
    pub async fn archive_dispatched_requests(
        &self,
        months_before_archive: u32,
    ) -> Result<ArchiveOutcome, RetentionError> {
        let now = self.clock.utc();
        let cutoff = archive_cutoff(now, months_before_archive);
        let mut tx = self.store.begin().await?;

        let candidates = match tx.lock_archive_candidates(cutoff).await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "selecting archive candidates failed");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed selection failed");
                }
                return Err(err.into());
            }
        };
        info!(
            candidates = candidates.len(),
            %cutoff,
            "archiving dispatched requests"
        );

        let mut archived = Vec::new();
        let mut failed_ids = Vec::new();
        for candidate in candidates {
            match self.archive_one(tx.as_mut(), &candidate, now).await {
                Ok(()) => archived.push(candidate),
                Err(failure) => {
                    warn!(record_id = %candidate.id, reason = %failure, "request not archived");
                    failed_ids.push(candidate.id);
                }
            }
        }

        if archived.is_empty() {
            tx.rollback().await?;
            return Ok(ArchiveOutcome {
                archived_count: 0,
                failed_ids,
                rolled_back: false,
                gate: None,
            });
        }

        let gate = self
            .integrity
            .check_within(tx.as_mut(), cutoff, Reconciliation::ReportOnly)
            .await
            .report;
        if !gate_passes(&gate, failed_ids.len()) {
            error!(
                status = ?gate.status,
                issues = gate.issues.len(),
                "integrity gate failed after archiving; rolling back batch"
            );
            tx.rollback().await?;
            return Ok(ArchiveOutcome {
                archived_count: 0,
                failed_ids,
                rolled_back: true,
                gate: Some(gate),
            });
        }
        tx.commit().await?;

        for request in &archived {
            self.audit.record(
                AuditOperation::Archive,
                AuditTable::SampleRequest,
                request.id,
                request,
            );
        }
        info!(
            archived = archived.len(),
            failed = failed_ids.len(),
            "archive batch committed"
        );
        Ok(ArchiveOutcome {
            archived_count: archived.len(),
            failed_ids,
            rolled_back: false,
            gate: Some(gate),
        })
    }

    async fn archive_one(
        &self,
        tx: &mut dyn RequestTransaction,
        candidate: &SampleRequest,
        now: DateTime<Utc>,
    ) -> Result<(), RecordFailure> {
        let savepoint = format!("archive_{}", candidate.id.get());
        tx.savepoint(&savepoint).await?;
        match move_record(tx, candidate, now).await {
            Ok(()) => {
                tx.release_savepoint(&savepoint).await?;
                Ok(())
            }
            Err(failure) => {
                tx.rollback_to_savepoint(&savepoint).await?;
                Err(failure)
            }
        }
    }
}

async fn move_record(
    tx: &mut dyn RequestTransaction,
    candidate: &SampleRequest,
    now: DateTime<Utc>,
) -> Result<(), RecordFailure> {
    let current = tx
        .find_active(candidate.id)
        .await?
        .ok_or(RecordFailure::Vanished)?;
    let row = NewArchivedRequest::from_active(&current, now)?;
    tx.insert_archived(&row).await?;

    let copy = tx
        .find_archived(current.id)
        .await?
        .ok_or(RecordFailure::CopyMissing)?;
    if copy.details != current.details || copy.original_id != current.id {
        return Err(RecordFailure::CopyMismatch);
    }

    let token = ArchiveToken::issue(current.id);
    if !tx.delete_active(&token).await? {
        return Err(RecordFailure::DeleteMissed);
    }
    Ok(())
}

/// The gate tolerates only the staleness left by records that failed
/// individually; every other issue, or an errored check, fails it.
fn gate_passes(report: &IntegrityReport, failed_records: usize) -> bool {
    if report.is_healthy() {
        return true;
    }
    if report.error.is_some() {
        return false;
    }
    report.issues.iter().all(|issue| match issue {
        IntegrityIssue::StaleDispatched { count, .. } => {
            usize::try_from(*count).is_ok_and(|count| count <= failed_records)
        }
        _ => false,
    })
}

#[cfg(test)]
#[path = "archiver_tests.rs"]
mod tests;
