//! Recovery of lost requests from the audit trail and from snapshots.
//!
//! Rebuilt requests keep their original id, so a reconciled request is found
//! again by the next reconciliation pass and a snapshot restore can be
//! replayed without creating copies.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::RetentionError;
use crate::domain::audit::{AuditOperation, AuditTable, AuditTrail};
use crate::domain::ports::{RequestStore, RequestStoreError, RequestTransaction};
use crate::domain::request::{
    ArchivedRequest, NewArchivedRequest, RequestDetails, RequestId, RequestStatus, SampleRequest,
    serde_compat,
};
use crate::domain::snapshot::{SnapshotReceipt, SnapshotService};

/// Reasons a request could not be rebuilt from the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryFailure {
    /// Nothing was ever logged for the id.
    #[error("no audit entry for request {id}")]
    NoAuditEntry {
        /// Request being recovered.
        id: RequestId,
    },
    /// The latest entry does not describe a live active row.
    #[error("latest audit entry for {id} is a {operation} on {table}")]
    NotRecoverable {
        /// Request being recovered.
        id: RequestId,
        /// Operation of the latest entry.
        operation: AuditOperation,
        /// Table of the latest entry.
        table: AuditTable,
    },
    /// The logged snapshot was altered after it was written.
    #[error("audit entry for {id} failed checksum verification")]
    ChecksumMismatch {
        /// Request being recovered.
        id: RequestId,
    },
    /// The id already lives in one of the tables.
    #[error("request {id} already exists")]
    AlreadyPresent {
        /// Request being recovered.
        id: RequestId,
    },
    /// The logged snapshot is not a valid request.
    #[error("audit snapshot for {id} is unreadable: {message}")]
    Decode {
        /// Request being recovered.
        id: RequestId,
        /// Decoder error.
        message: String,
    },
    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] RequestStoreError),
}

/// Rebuild `id` as an active request from its latest audit entry.
///
/// Writes through `tx` without committing. Refuses when the entry is not an
/// insert or update of the active table, when its checksum does not match,
/// or when the id already lives in either table.
pub(crate) async fn rebuild_from_audit(
    tx: &mut dyn RequestTransaction,
    audit: &AuditTrail,
    id: RequestId,
) -> Result<SampleRequest, RecoveryFailure> {
    let entry = audit
        .find_latest(id)
        .ok_or(RecoveryFailure::NoAuditEntry { id })?;
    if entry.table != AuditTable::SampleRequest || !entry.operation.is_recoverable() {
        return Err(RecoveryFailure::NotRecoverable {
            id,
            operation: entry.operation,
            table: entry.table,
        });
    }
    if !entry.checksum_matches() {
        return Err(RecoveryFailure::ChecksumMismatch { id });
    }

    let details: RequestDetails =
        serde_json::from_value(entry.data).map_err(|err| RecoveryFailure::Decode {
            id,
            message: err.to_string(),
        })?;
    if tx.find_active(id).await?.is_some() || tx.find_archived(id).await?.is_some() {
        return Err(RecoveryFailure::AlreadyPresent { id });
    }

    let request = SampleRequest { id, details };
    tx.restore_request(&request).await?;
    Ok(request)
}

/// Outcome of reconciling the audit trail against the tables.
#[derive(Debug, Default)]
pub(crate) struct Reconciled {
    pub missing: Vec<RequestId>,
    pub recovered: Vec<SampleRequest>,
    pub failures: Vec<(RequestId, String)>,
}

/// Find logged ids absent from both tables and, when `recover` is set,
/// rebuild each one behind its own savepoint.
pub(crate) async fn reconcile_audit(
    tx: &mut dyn RequestTransaction,
    audit: &AuditTrail,
    active: &BTreeSet<RequestId>,
    archived: &BTreeSet<RequestId>,
    recover: bool,
) -> Result<Reconciled, RequestStoreError> {
    let missing: Vec<_> = audit
        .logged_request_ids()
        .into_iter()
        .filter(|id| !active.contains(id) && !archived.contains(id))
        .collect();
    let mut reconciled = Reconciled {
        missing: missing.clone(),
        ..Reconciled::default()
    };
    if !recover {
        return Ok(reconciled);
    }

    for id in missing {
        warn!(record_id = %id, "logged request missing from store");
        let savepoint = format!("recover_{}", id.get());
        tx.savepoint(&savepoint).await?;
        match rebuild_from_audit(tx, audit, id).await {
            Ok(request) => {
                tx.release_savepoint(&savepoint).await?;
                info!(record_id = %id, "recovered request from audit log");
                reconciled.recovered.push(request);
            }
            Err(RecoveryFailure::Store(err)) => {
                tx.rollback_to_savepoint(&savepoint).await?;
                warn!(record_id = %id, error = %err, "audit recovery failed");
                reconciled.failures.push((id, err.to_string()));
            }
            Err(failure) => {
                tx.rollback_to_savepoint(&savepoint).await?;
                warn!(record_id = %id, reason = %failure, "audit recovery refused");
                reconciled.failures.push((id, failure.to_string()));
            }
        }
    }
    Ok(reconciled)
}

/// Where a request currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyLocation {
    /// The active table.
    Active,
    /// The archive table.
    Archived,
}

/// A row with missing or contradictory fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteRecord {
    /// Table holding the row.
    pub location: CopyLocation,
    /// Logical request id.
    pub id: RequestId,
    /// Each missing or inconsistent field.
    pub problems: Vec<String>,
}

/// Which copy of a doubly stored request should be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateAssessment {
    /// Logical request id.
    pub id: RequestId,
    /// Copy to trust.
    pub authoritative: CopyLocation,
    /// Submission time of the active copy.
    #[serde(with = "serde_compat::timestamp")]
    pub active_submitted: DateTime<Utc>,
    /// Archive time of the archived copy.
    #[serde(with = "serde_compat::timestamp")]
    pub archived_at: DateTime<Utc>,
}

/// A request that could not be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecovery {
    /// Logical request id.
    pub id: RequestId,
    /// Why the rebuild was refused or failed.
    pub reason: String,
}

/// Report of a full recovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryScanReport {
    /// When the scan began.
    #[serde(with = "serde_compat::timestamp")]
    pub started_at: DateTime<Utc>,
    /// Logged ids absent from both tables.
    pub missing_from_store: Vec<RequestId>,
    /// Ids rebuilt from the audit trail.
    pub recovered: Vec<RequestId>,
    /// Ids that could not be rebuilt.
    pub failed_recoveries: Vec<FailedRecovery>,
    /// Ids present in both tables.
    pub cross_table_duplicates: Vec<RequestId>,
    /// Rows checked for completeness.
    pub records_verified: usize,
    /// Rows failing the completeness check.
    pub incomplete_records: Vec<IncompleteRecord>,
    /// Verdict for each cross-table duplicate.
    pub duplicate_assessments: Vec<DuplicateAssessment>,
    /// Snapshot taken at the end of the scan.
    pub snapshot: Option<SnapshotReceipt>,
    /// Steps that failed outright.
    pub errors: Vec<String>,
}

/// A snapshot entry that restore declined to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreConflict {
    /// Logical request id.
    pub id: RequestId,
    /// Side the entry would have been written to.
    pub location: CopyLocation,
    /// Why it was skipped.
    pub reason: String,
}

/// Report of a snapshot restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Snapshot file that was replayed.
    pub snapshot: String,
    /// Active requests recreated.
    pub restored_active: Vec<RequestId>,
    /// Archive rows recreated.
    pub restored_archived: Vec<RequestId>,
    /// Entries skipped because the row already exists.
    pub already_present: usize,
    /// Entries skipped to keep each request in one table.
    pub conflicts: Vec<RestoreConflict>,
}

/// Rebuilds lost requests and replays snapshots.
#[derive(Clone)]
pub struct RecoveryEngine {
    store: Arc<dyn RequestStore>,
    audit: AuditTrail,
    snapshots: SnapshotService,
    clock: Arc<dyn Clock>,
}

impl RecoveryEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        audit: AuditTrail,
        snapshots: SnapshotService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            snapshots,
            clock,
        }
    }

    /// Rebuild one request from the audit trail and commit it.
    ///
    /// Failures are logged and returned; the store is left unchanged.
    pub async fn recover_from_audit(&self, id: RequestId) -> Result<SampleRequest, RecoveryFailure> {
        let result = async {
            let mut tx = self.store.begin().await?;
            match rebuild_from_audit(tx.as_mut(), &self.audit, id).await {
                Ok(request) => {
                    tx.commit().await?;
                    Ok(request)
                }
                Err(failure) => {
                    tx.rollback().await?;
                    Err(failure)
                }
            }
        }
        .await;

        match &result {
            Ok(request) => {
                info!(record_id = %id, "recovered request from audit log");
                self.audit.record(
                    AuditOperation::Insert,
                    AuditTable::SampleRequest,
                    id,
                    request,
                );
            }
            Err(failure) => error!(record_id = %id, reason = %failure, "audit recovery failed"),
        }
        result
    }

    /// Reconcile, verify and snapshot the whole store.
    ///
    /// Duplicate assessment is observational: archived rows are immutable,
    /// so a request found in both tables is reported with the copy to trust
    /// and left for an operator.
    pub async fn perform_full_recovery_scan(&self) -> RecoveryScanReport {
        let mut report = RecoveryScanReport {
            started_at: self.clock.utc(),
            missing_from_store: Vec::new(),
            recovered: Vec::new(),
            failed_recoveries: Vec::new(),
            cross_table_duplicates: Vec::new(),
            records_verified: 0,
            incomplete_records: Vec::new(),
            duplicate_assessments: Vec::new(),
            snapshot: None,
            errors: Vec::new(),
        };
        info!("starting full recovery scan");

        if let Err(err) = self.recover_missing(&mut report).await {
            error!(error = %err, "audit reconciliation failed");
            report.errors.push(format!("audit reconciliation: {err}"));
        }
        if let Err(err) = self.inspect_tables(&mut report).await {
            error!(error = %err, "record verification failed");
            report.errors.push(format!("record verification: {err}"));
        }

        match self
            .snapshots
            .create_backup_snapshot("recovery_scan", serde_json::Value::Null)
            .await
        {
            Ok(receipt) => report.snapshot = Some(receipt),
            Err(err) => {
                error!(error = %err, "recovery scan snapshot failed");
                report.errors.push(format!("snapshot: {err}"));
            }
        }

        info!(
            recovered = report.recovered.len(),
            duplicates = report.cross_table_duplicates.len(),
            incomplete = report.incomplete_records.len(),
            "recovery scan completed"
        );
        report
    }

    async fn recover_missing(&self, report: &mut RecoveryScanReport) -> Result<(), RequestStoreError> {
        let mut tx = self.store.begin().await?;
        let active: BTreeSet<_> = tx.active_ids().await?.into_iter().collect();
        let archived: BTreeSet<_> = tx.archived_original_ids().await?.into_iter().collect();
        let reconciled =
            reconcile_audit(tx.as_mut(), &self.audit, &active, &archived, true).await?;
        tx.commit().await?;

        for request in &reconciled.recovered {
            self.audit.record(
                AuditOperation::Insert,
                AuditTable::SampleRequest,
                request.id,
                request,
            );
        }
        report.missing_from_store = reconciled.missing;
        report.recovered = reconciled.recovered.iter().map(|request| request.id).collect();
        report.failed_recoveries = reconciled
            .failures
            .into_iter()
            .map(|(id, reason)| FailedRecovery { id, reason })
            .collect();
        Ok(())
    }

    async fn inspect_tables(&self, report: &mut RecoveryScanReport) -> Result<(), RequestStoreError> {
        let mut tx = self.store.begin().await?;
        let listed = async {
            let active = tx.list_active().await?;
            let archived = tx.list_archived().await?;
            Ok::<_, RequestStoreError>((active, archived))
        }
        .await;
        tx.rollback().await?;
        let (active, archived) = listed?;

        for copy in &archived {
            if let Some(live) = active.iter().find(|request| request.id == copy.original_id) {
                warn!(record_id = %copy.original_id, "request present in both tables");
                report.cross_table_duplicates.push(copy.original_id);
                report.duplicate_assessments.push(assess_duplicate(live, copy));
            }
        }

        report.records_verified = active.len() + archived.len();
        report.incomplete_records.extend(
            active
                .iter()
                .filter_map(|request| incomplete(CopyLocation::Active, request.id, &request.details)),
        );
        report.incomplete_records.extend(archived.iter().filter_map(|copy| {
            incomplete(CopyLocation::Archived, copy.original_id, &copy.details)
        }));
        Ok(())
    }

    /// Replay a stored snapshot additively.
    ///
    /// Existing rows are never overwritten and an entry is never recreated on
    /// one side while the request lives on the other. All writes commit
    /// together or not at all.
    pub async fn restore_from_backup(&self, name: &str) -> Result<RestoreReport, RetentionError> {
        let snapshot = self.snapshots.load(name)?;
        let mut tx = self.store.begin().await?;
        let mut report = RestoreReport {
            snapshot: name.to_owned(),
            ..RestoreReport::default()
        };

        let replayed = async {
            let mut active: BTreeSet<_> = tx.active_ids().await?.into_iter().collect();
            let mut archived: BTreeSet<_> =
                tx.archived_original_ids().await?.into_iter().collect();

            for request in &snapshot.active_records {
                if active.contains(&request.id) {
                    report.already_present += 1;
                } else if archived.contains(&request.id) {
                    report.conflicts.push(RestoreConflict {
                        id: request.id,
                        location: CopyLocation::Active,
                        reason: "request is archived".to_owned(),
                    });
                } else {
                    tx.restore_request(request).await?;
                    active.insert(request.id);
                    report.restored_active.push(request.id);
                }
            }

            for copy in &snapshot.archived_records {
                let id = copy.original_id;
                if archived.contains(&id) {
                    report.already_present += 1;
                } else if active.contains(&id) {
                    report.conflicts.push(RestoreConflict {
                        id,
                        location: CopyLocation::Archived,
                        reason: "request is active".to_owned(),
                    });
                } else if copy.details.status != RequestStatus::Dispatched
                    || copy.details.date_dispatched.is_none()
                {
                    report.conflicts.push(RestoreConflict {
                        id,
                        location: CopyLocation::Archived,
                        reason: "archived copy is not a dispatched request".to_owned(),
                    });
                } else {
                    tx.insert_archived(&NewArchivedRequest {
                        original_id: id,
                        date_archived: copy.date_archived,
                        details: copy.details.clone(),
                    })
                    .await?;
                    archived.insert(id);
                    report.restored_archived.push(id);
                }
            }
            Ok::<_, RequestStoreError>(())
        }
        .await;

        if let Err(err) = replayed {
            error!(snapshot = name, error = %err, "restore failed; rolling back");
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "restore rollback failed");
            }
            return Err(err.into());
        }
        tx.commit().await?;

        for request in snapshot
            .active_records
            .iter()
            .filter(|request| report.restored_active.contains(&request.id))
        {
            self.audit.record(
                AuditOperation::Insert,
                AuditTable::SampleRequest,
                request.id,
                request,
            );
        }
        info!(
            snapshot = name,
            active = report.restored_active.len(),
            archived = report.restored_archived.len(),
            conflicts = report.conflicts.len(),
            "snapshot restored"
        );
        Ok(report)
    }
}

/// The newer copy wins: an active row submitted after the archive date is a
/// resubmission, otherwise the archive is authoritative.
fn assess_duplicate(active: &SampleRequest, archived: &ArchivedRequest) -> DuplicateAssessment {
    let authoritative = if active.details.date_submitted > archived.date_archived {
        CopyLocation::Active
    } else {
        error!(
            record_id = %active.id,
            "archived copy is at least as new as the active row"
        );
        CopyLocation::Archived
    };
    DuplicateAssessment {
        id: active.id,
        authoritative,
        active_submitted: active.details.date_submitted,
        archived_at: archived.date_archived,
    }
}

fn incomplete(
    location: CopyLocation,
    id: RequestId,
    details: &RequestDetails,
) -> Option<IncompleteRecord> {
    let mut problems: Vec<String> = details
        .missing_required_fields()
        .into_iter()
        .map(|field| format!("missing {field}"))
        .collect();
    match location {
        CopyLocation::Active => {
            if !details.dispatch_date_consistent() {
                problems.push(format!(
                    "status {} disagrees with dispatch date",
                    details.status
                ));
            }
        }
        CopyLocation::Archived => {
            if details.date_dispatched.is_none() {
                problems.push("archived without dispatch date".to_owned());
            }
            if details.status != RequestStatus::Dispatched {
                problems.push(format!("archived with status {}", details.status));
            }
        }
    }
    (!problems.is_empty()).then_some(IncompleteRecord {
        location,
        id,
        problems,
    })
}

