//! Mandatory backup and verification around state-changing operations.
//!
//! [`SafeguardOrchestrator::execute_with_safeguards`] refuses to run an
//! operation unless the database is healthy and a snapshot has been written.
//! After the operation it re-checks health, integrity and business data and
//! compares counts with the snapshot. Those post checks are advisory: they
//! mark the outcome `issues_found` but never undo the operation.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::business_validation::{
    BusinessDataStatus, BusinessDataValidator, BusinessValidation,
};
use crate::domain::health::{DatabaseHealth, HealthReport, RecordCounts};
use crate::domain::integrity::{IntegrityChecker, IntegrityReport};
use crate::domain::ports::{OperationsJournal, RequestStore, RequestStoreError};
use crate::domain::request::serde_compat;
use crate::domain::snapshot::{SnapshotReceipt, SnapshotService};

/// Safeguard step recorded in the operations journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeguardStage {
    /// Snapshot taken before the operation.
    PreOperationBackup,
    /// Checks run after the operation.
    PostOperationVerification,
}

/// One line of the operations journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// When the step finished.
    #[serde(with = "serde_compat::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Which safeguard step ran.
    pub operation: SafeguardStage,
    /// Snapshot the step belongs to.
    pub backup_id: String,
    /// Name of the guarded operation.
    pub operation_type: String,
    /// `SUCCESS`, `FAILED: <reason>`, `success` or `issues_found`.
    pub status: String,
}

/// Errors from a safeguarded operation.
#[derive(Debug, thiserror::Error)]
pub enum SafeguardError<E> {
    /// The operation never ran: the database was unhealthy or the snapshot
    /// could not be written.
    #[error("pre-flight for {operation} failed: {message}")]
    Preflight {
        /// Name of the guarded operation.
        operation: String,
        /// Why pre-flight failed.
        message: String,
    },
    /// The operation itself failed after its backup was taken.
    #[error("{operation} failed; backup {backup_id} holds the prior state")]
    Operation {
        /// Name of the guarded operation.
        operation: String,
        /// Snapshot taken before it ran.
        backup_id: String,
        /// Error returned by the operation.
        #[source]
        source: E,
    },
}

/// Overall post-verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Every post check passed.
    Success,
    /// At least one critical finding.
    IssuesFound,
}

/// Row counts on one side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    /// Rows in the active table.
    pub active: u64,
    /// Rows in the archive table.
    pub archived: u64,
}

/// Signed change in row counts since the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountChanges {
    /// Change in active rows.
    pub active_records_change: i64,
    /// Change in archive rows.
    pub archived_records_change: i64,
    /// Change across both tables.
    pub total_change: i64,
}

/// Current counts set against the pre-operation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupComparison {
    /// Both sides were counted.
    Compared {
        /// Counts stored in the snapshot.
        backup_counts: TableCounts,
        /// Counts read after the operation.
        current_counts: TableCounts,
        /// Difference between the two.
        changes: CountChanges,
    },
    /// The snapshot or the store could not be read.
    Unavailable {
        /// Why the comparison failed.
        error: String,
    },
}

/// Result of the checks run after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostVerification {
    /// Overall verdict.
    pub status: VerificationStatus,
    /// When verification finished.
    #[serde(with = "serde_compat::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Pre-operation snapshot.
    pub backup_id: String,
    /// Name of the guarded operation.
    pub operation_type: String,
    /// Connectivity after the operation.
    pub database_health: HealthReport,
    /// Integrity after the operation.
    pub integrity_check: IntegrityReport,
    /// Business plausibility, when it could be read.
    pub business_validation: Option<BusinessValidation>,
    /// Counts against the snapshot.
    pub backup_comparison: BackupComparison,
    /// Findings that mark the outcome `issues_found`.
    pub critical_issues: Vec<String>,
}

/// A completed safeguarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafeguardedOutcome<T> {
    /// Name of the guarded operation.
    pub operation_name: String,
    /// Value returned by the operation.
    pub operation_result: T,
    /// Snapshot taken before it ran.
    pub backup: SnapshotReceipt,
    /// Post-operation checks.
    pub verification: PostVerification,
}

/// Wraps operations with pre-flight snapshots and post verification.
#[derive(Clone)]
pub struct SafeguardOrchestrator {
    store: Arc<dyn RequestStore>,
    health: DatabaseHealth,
    integrity: IntegrityChecker,
    snapshots: SnapshotService,
    business: BusinessDataValidator,
    journal: Arc<dyn OperationsJournal>,
    clock: Arc<dyn Clock>,
}

impl SafeguardOrchestrator {
    /// Create an orchestrator.
    #[expect(
        clippy::too_many_arguments,
        reason = "one collaborator per safeguard step"
    )]
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        health: DatabaseHealth,
        integrity: IntegrityChecker,
        snapshots: SnapshotService,
        business: BusinessDataValidator,
        journal: Arc<dyn OperationsJournal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            health,
            integrity,
            snapshots,
            business,
            journal,
            clock,
        }
    }

    /// Run `operation` between a mandatory snapshot and post verification.
    ///
    /// # Errors
    ///
    /// [`SafeguardError::Preflight`] when the database is unhealthy or the
    /// snapshot fails, in which case `operation` is never invoked;
    /// [`SafeguardError::Operation`] when `operation` itself fails.
    pub async fn execute_with_safeguards<T, E, F, Fut>(
        &self,
        operation_name: &str,
        operation_details: Value,
        operation: F,
    ) -> Result<SafeguardedOutcome<T>, SafeguardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        info!(operation = operation_name, "executing with safeguards");
        let backup = self
            .pre_operation_backup(operation_name, operation_details)
            .await?;

        let operation_result = match operation().await {
            Ok(result) => result,
            Err(source) => {
                error!(
                    operation = operation_name,
                    backup_id = %backup.backup_id,
                    error = %source,
                    "safeguarded operation failed; check the backup for recovery"
                );
                return Err(SafeguardError::Operation {
                    operation: operation_name.to_owned(),
                    backup_id: backup.backup_id,
                    source,
                });
            }
        };
        info!(operation = operation_name, "operation completed");

        let verification = self.post_operation_verification(&backup, operation_name).await;
        Ok(SafeguardedOutcome {
            operation_name: operation_name.to_owned(),
            operation_result,
            backup,
            verification,
        })
    }

    async fn pre_operation_backup<E>(
        &self,
        operation_name: &str,
        operation_details: Value,
    ) -> Result<SnapshotReceipt, SafeguardError<E>> {
        let health = self.health.check().await;
        if !health.is_healthy() {
            let message = format!(
                "database unhealthy: {}",
                health.error.as_deref().unwrap_or("unknown failure")
            );
            error!(operation = operation_name, %message, "refusing to run without a healthy database");
            self.log_stage(
                SafeguardStage::PreOperationBackup,
                "",
                operation_name,
                format!("FAILED: {message}"),
            );
            return Err(SafeguardError::Preflight {
                operation: operation_name.to_owned(),
                message,
            });
        }

        match self
            .snapshots
            .capture(operation_name, operation_details, health)
            .await
        {
            Ok(receipt) => {
                self.log_stage(
                    SafeguardStage::PreOperationBackup,
                    &receipt.backup_id,
                    operation_name,
                    "SUCCESS".to_owned(),
                );
                info!(operation = operation_name, snapshot = %receipt.name, "pre-operation backup completed");
                Ok(receipt)
            }
            Err(err) => {
                error!(operation = operation_name, error = %err, "pre-operation backup failed");
                self.log_stage(
                    SafeguardStage::PreOperationBackup,
                    "",
                    operation_name,
                    format!("FAILED: {err}"),
                );
                Err(SafeguardError::Preflight {
                    operation: operation_name.to_owned(),
                    message: format!("backup failed: {err}"),
                })
            }
        }
    }

    /// Re-check everything after an operation. Never fails; problems are
    /// reported in the result.
    pub async fn post_operation_verification(
        &self,
        backup: &SnapshotReceipt,
        operation_name: &str,
    ) -> PostVerification {
        let database_health = self.health.check().await;
        let integrity_check = self.integrity.perform_integrity_check().await;
        let business = self.business.validate().await;
        let backup_comparison = self.compare_with_backup(&backup.name).await;

        let mut critical_issues = Vec::new();
        if !database_health.is_healthy() {
            critical_issues.push(format!(
                "database health compromised: {}",
                database_health.error.as_deref().unwrap_or("unknown failure")
            ));
        }
        if !integrity_check.is_healthy() {
            let detail = integrity_check.error.clone().unwrap_or_else(|| {
                integrity_check
                    .issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            });
            critical_issues.push(format!("data integrity issues found: {detail}"));
        }
        let business_validation = match business {
            Ok(validation) => {
                if validation.status != BusinessDataStatus::Clean {
                    critical_issues.push(format!(
                        "business data contamination: {}",
                        validation.issues.join("; ")
                    ));
                }
                Some(validation)
            }
            Err(err) => {
                critical_issues.push(format!("business data validation failed: {err}"));
                None
            }
        };

        let status = if critical_issues.is_empty() {
            info!(operation = operation_name, "post-operation verification clean");
            VerificationStatus::Success
        } else {
            for issue in &critical_issues {
                warn!(operation = operation_name, %issue, "post-operation issue");
            }
            VerificationStatus::IssuesFound
        };
        self.log_stage(
            SafeguardStage::PostOperationVerification,
            &backup.backup_id,
            operation_name,
            match status {
                VerificationStatus::Success => "success",
                VerificationStatus::IssuesFound => "issues_found",
            }
            .to_owned(),
        );

        PostVerification {
            status,
            timestamp: self.clock.utc(),
            backup_id: backup.backup_id.clone(),
            operation_type: operation_name.to_owned(),
            database_health,
            integrity_check,
            business_validation,
            backup_comparison,
            critical_issues,
        }
    }

    async fn compare_with_backup(&self, name: &str) -> BackupComparison {
        let snapshot = match self.snapshots.load(name) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return BackupComparison::Unavailable {
                    error: err.to_string(),
                };
            }
        };
        let current = match self.current_counts().await {
            Ok(counts) => counts,
            Err(err) => {
                return BackupComparison::Unavailable {
                    error: err.to_string(),
                };
            }
        };
        let (active, archived) = snapshot.counts();
        let backup_counts = TableCounts {
            active: u64::try_from(active).unwrap_or(u64::MAX),
            archived: u64::try_from(archived).unwrap_or(u64::MAX),
        };
        let current_counts = TableCounts {
            active: current.total,
            archived: current.archived,
        };
        let active_change = signed_delta(current_counts.active, backup_counts.active);
        let archived_change = signed_delta(current_counts.archived, backup_counts.archived);
        BackupComparison::Compared {
            backup_counts,
            current_counts,
            changes: CountChanges {
                active_records_change: active_change,
                archived_records_change: archived_change,
                total_change: active_change.saturating_add(archived_change),
            },
        }
    }

    async fn current_counts(&self) -> Result<RecordCounts, RequestStoreError> {
        let mut tx = self.store.begin().await?;
        let counts = RecordCounts::read(tx.as_mut()).await;
        tx.rollback().await?;
        counts
    }

    fn log_stage(
        &self,
        stage: SafeguardStage,
        backup_id: &str,
        operation_type: &str,
        status: String,
    ) {
        let record = OperationRecord {
            timestamp: self.clock.utc(),
            operation: stage,
            backup_id: backup_id.to_owned(),
            operation_type: operation_type.to_owned(),
            status,
        };
        if let Err(err) = self.journal.append(&record) {
            error!(error = %err, "operations journal write failed");
        }
    }
}

fn signed_delta(current: u64, before: u64) -> i64 {
    let current = i64::try_from(current).unwrap_or(i64::MAX);
    let before = i64::try_from(before).unwrap_or(i64::MAX);
    current.saturating_sub(before)
}

#[cfg(test)]
#[path = "safeguards_tests.rs"]
mod tests;
