//! Integrity verification across the request tables and the audit trail.
//!
//! A check runs four independent passes and collects every issue found:
//!
//! 1. cross-table duplicates (an id active and archived at once);
//! 2. audit reconciliation (logged ids present in neither table), with an
//!    attempted rebuild from the audit trail for each missing id;
//! 3. staleness (dispatched requests past the archive cutoff still active);
//! 4. schema reachability of both tables.
//!
//! A store failure while checking yields [`IntegrityStatus::Error`], which
//! callers must treat as unknown health.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::audit::{AuditOperation, AuditTable, AuditTrail};
use crate::domain::ports::{RequestStore, RequestStoreError, RequestTransaction};
use crate::domain::recovery::reconcile_audit;
use crate::domain::request::{RequestId, SampleRequest, serde_compat};

/// Age in days after which a dispatched request should have been archived.
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 120;

/// Approximate month length used for archive cutoffs.
pub const DAYS_PER_MONTH: i64 = 30;

/// Cutoff for a retention period of `months`.
#[must_use]
pub fn archive_cutoff(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(months) * DAYS_PER_MONTH)
}

/// Overall verdict of an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// No issues were found.
    Healthy,
    /// At least one issue was found.
    IssuesFound,
    /// The check could not complete; health is unknown.
    Error,
}

/// A single problem found by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Ids present in both tables.
    CrossTableDuplicates {
        /// Offending request ids.
        ids: Vec<RequestId>,
    },
    /// Logged ids present in neither table.
    MissingFromStore {
        /// Ids absent from both tables.
        ids: Vec<RequestId>,
    },
    /// A missing request was rebuilt from its audit entry.
    RecoveredFromAudit {
        /// Rebuilt request.
        id: RequestId,
    },
    /// A missing request could not be rebuilt.
    RecoveryFailed {
        /// Request that stayed missing.
        id: RequestId,
        /// Why the rebuild failed.
        reason: String,
    },
    /// Dispatched requests past the cutoff still in the active table.
    StaleDispatched {
        /// Number of stale requests.
        count: u64,
        /// Dispatch date they are older than.
        #[serde(with = "serde_compat::timestamp")]
        cutoff: DateTime<Utc>,
    },
    /// A table could not be queried.
    SchemaUnreachable {
        /// Store error.
        message: String,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrossTableDuplicates { ids } => {
                write!(f, "duplicate records in both tables: {}", join_ids(ids))
            }
            Self::MissingFromStore { ids } => {
                write!(f, "records missing from both tables: {}", join_ids(ids))
            }
            Self::RecoveredFromAudit { id } => write!(f, "recovered {id} from audit log"),
            Self::RecoveryFailed { id, reason } => write!(f, "could not recover {id}: {reason}"),
            Self::StaleDispatched { count, cutoff } => write!(
                f,
                "{count} dispatched records older than {} are not archived",
                cutoff.format("%Y-%m-%d")
            ),
            Self::SchemaUnreachable { message } => write!(f, "table unreachable: {message}"),
        }
    }
}

fn join_ids(ids: &[RequestId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Overall verdict.
    pub status: IntegrityStatus,
    /// When the check ran.
    #[serde(with = "serde_compat::timestamp")]
    pub checked_at: DateTime<Utc>,
    /// Every issue found, in pass order.
    #[serde(default)]
    pub issues: Vec<IntegrityIssue>,
    /// Why the check could not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntegrityReport {
    fn from_issues(checked_at: DateTime<Utc>, issues: Vec<IntegrityIssue>) -> Self {
        let status = if issues.is_empty() {
            IntegrityStatus::Healthy
        } else {
            IntegrityStatus::IssuesFound
        };
        Self {
            status,
            checked_at,
            issues,
            error: None,
        }
    }

    fn failed(checked_at: DateTime<Utc>, err: &RequestStoreError) -> Self {
        Self {
            status: IntegrityStatus::Error,
            checked_at,
            issues: Vec::new(),
            error: Some(err.to_string()),
        }
    }

    /// Only an explicit healthy verdict counts as healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == IntegrityStatus::Healthy
    }
}

/// Whether reconciliation may write rebuilt records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Rebuild missing records from the audit trail.
    Recover,
    /// Report missing records only.
    ReportOnly,
}

/// Check result plus the rows rebuilt while checking.
#[derive(Debug)]
pub(crate) struct CheckOutcome {
    pub report: IntegrityReport,
    pub recovered: Vec<SampleRequest>,
}

/// Runs integrity checks against the store and the audit trail.
#[derive(Clone)]
pub struct IntegrityChecker {
    store: Arc<dyn RequestStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    stale_after_days: i64,
}

impl IntegrityChecker {
    /// Create a checker using the default staleness threshold.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, audit: AuditTrail, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }

    /// Override the staleness threshold.
    #[must_use]
    pub fn with_stale_after_days(mut self, days: i64) -> Self {
        self.stale_after_days = days;
        self
    }

    /// Cutoff used by the staleness pass at the current time.
    #[must_use]
    pub fn default_cutoff(&self) -> DateTime<Utc> {
        self.clock.utc() - Duration::days(self.stale_after_days)
    }

    /// Run a full check in its own transaction and commit any recoveries.
    pub async fn perform_integrity_check(&self) -> IntegrityReport {
        let checked_at = self.clock.utc();
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "integrity check could not open a transaction");
                return IntegrityReport::failed(checked_at, &err);
            }
        };

        let outcome = self
            .check_within(tx.as_mut(), self.default_cutoff(), Reconciliation::Recover)
            .await;
        if outcome.report.status == IntegrityStatus::Error {
            if let Err(err) = tx.rollback().await {
                warn!(error = %err, "rollback after failed integrity check failed");
            }
            return outcome.report;
        }
        if let Err(err) = tx.commit().await {
            error!(error = %err, "committing integrity check recoveries failed");
            return IntegrityReport::failed(checked_at, &err);
        }

        for request in &outcome.recovered {
            self.audit.record(
                AuditOperation::Insert,
                AuditTable::SampleRequest,
                request.id,
                request,
            );
        }
        info!(
            status = ?outcome.report.status,
            issues = outcome.report.issues.len(),
            "integrity check completed"
        );
        outcome.report
    }

    /// Run all passes inside `tx` without committing.
    pub(crate) async fn check_within(
        &self,
        tx: &mut dyn RequestTransaction,
        cutoff: DateTime<Utc>,
        reconciliation: Reconciliation,
    ) -> CheckOutcome {
        let checked_at = self.clock.utc();
        let mut issues = Vec::new();
        let mut recovered = Vec::new();

        let passes = async {
            let active: BTreeSet<_> = tx.active_ids().await?.into_iter().collect();
            let archived: BTreeSet<_> = tx.archived_original_ids().await?.into_iter().collect();

            let duplicates: Vec<_> = active.intersection(&archived).copied().collect();
            if !duplicates.is_empty() {
                error!(ids = %join_ids(&duplicates), "requests present in both tables");
                issues.push(IntegrityIssue::CrossTableDuplicates { ids: duplicates });
            }

            let reconciled = reconcile_audit(
                &mut *tx,
                &self.audit,
                &active,
                &archived,
                reconciliation == Reconciliation::Recover,
            )
            .await?;
            if !reconciled.missing.is_empty() {
                warn!(ids = %join_ids(&reconciled.missing), "logged requests missing from store");
                issues.push(IntegrityIssue::MissingFromStore {
                    ids: reconciled.missing,
                });
            }
            for request in &reconciled.recovered {
                issues.push(IntegrityIssue::RecoveredFromAudit { id: request.id });
            }
            for (id, reason) in reconciled.failures {
                issues.push(IntegrityIssue::RecoveryFailed { id, reason });
            }
            recovered = reconciled.recovered;

            let stale = tx.count_stale_dispatched(cutoff).await?;
            if stale > 0 {
                issues.push(IntegrityIssue::StaleDispatched {
                    count: stale,
                    cutoff,
                });
            }

            if let Err(err) = tx.probe_tables().await {
                issues.push(IntegrityIssue::SchemaUnreachable {
                    message: err.to_string(),
                });
            }
            Ok::<_, RequestStoreError>(())
        }
        .await;

        match passes {
            Ok(()) => CheckOutcome {
                report: IntegrityReport::from_issues(checked_at, issues),
                recovered,
            },
            Err(err) => {
                error!(error = %err, "integrity check failed");
                CheckOutcome {
                    report: IntegrityReport::failed(checked_at, &err),
                    recovered: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "integrity_tests.rs"]
mod tests;
