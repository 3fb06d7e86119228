//! Wiring of the retention services over a shared set of ports.

use std::sync::Arc;

use mockable::Clock;
use serde_json::json;

use crate::domain::RetentionError;
use crate::domain::archiver::{ArchiveOutcome, Archiver};
use crate::domain::audit::AuditTrail;
use crate::domain::business_validation::{BusinessDataValidator, BusinessRules};
use crate::domain::health::DatabaseHealth;
use crate::domain::integrity::{DEFAULT_STALE_AFTER_DAYS, IntegrityChecker};
use crate::domain::ledger::RequestLedger;
use crate::domain::monitor::{HealthMonitor, MonitorSettings};
use crate::domain::ports::{AlertSink, AuditLog, OperationsJournal, RequestStore, SnapshotRepository};
use crate::domain::recovery::RecoveryEngine;
use crate::domain::safeguards::{SafeguardError, SafeguardOrchestrator, SafeguardedOutcome};
use crate::domain::snapshot::SnapshotService;

/// Adapters the services run against.
#[derive(Clone)]
pub struct RetentionPorts {
    /// Active and archive tables.
    pub store: Arc<dyn RequestStore>,
    /// Durable audit entries.
    pub audit_log: Arc<dyn AuditLog>,
    /// Outcome of every safeguarded operation.
    pub operations: Arc<dyn OperationsJournal>,
    /// Backup snapshot files.
    pub snapshots: Arc<dyn SnapshotRepository>,
    /// Monitor alert delivery.
    pub alerts: Arc<dyn AlertSink>,
}

/// Tunables that are not adapters.
#[derive(Debug, Clone)]
pub struct RetentionOptions {
    /// Age after which a dispatched request counts as stale.
    pub stale_after_days: i64,
    /// Company names used by the plausibility check.
    pub business_rules: BusinessRules,
    /// Health monitor thresholds.
    pub monitor: MonitorSettings,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
            business_rules: BusinessRules::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

/// Every retention service, sharing one store, audit trail and clock.
#[derive(Clone)]
pub struct RetentionServices {
    /// Audit trail.
    pub audit: AuditTrail,
    /// Connectivity probe.
    pub health: DatabaseHealth,
    /// Integrity checker.
    pub integrity: IntegrityChecker,
    /// Snapshot creation and listing.
    pub snapshots: SnapshotService,
    /// Archiver for old dispatched requests.
    pub archiver: Archiver,
    /// Audit and snapshot recovery.
    pub recovery: RecoveryEngine,
    /// Business plausibility check.
    pub business: BusinessDataValidator,
    /// Pre and post operation safeguards.
    pub safeguards: SafeguardOrchestrator,
    /// Submission and status updates.
    pub ledger: RequestLedger,
    /// Periodic health monitor.
    pub monitor: HealthMonitor,
}

impl RetentionServices {
    /// Build the services over `ports`.
    #[must_use]
    pub fn new(ports: RetentionPorts, clock: Arc<dyn Clock>, options: RetentionOptions) -> Self {
        let RetentionPorts {
            store,
            audit_log,
            operations,
            snapshots: snapshot_repository,
            alerts,
        } = ports;

        let audit = AuditTrail::new(audit_log, Arc::clone(&clock));
        let health = DatabaseHealth::new(Arc::clone(&store), Arc::clone(&clock));
        let integrity = IntegrityChecker::new(Arc::clone(&store), audit.clone(), Arc::clone(&clock))
            .with_stale_after_days(options.stale_after_days);
        let snapshots = SnapshotService::new(
            Arc::clone(&store),
            snapshot_repository,
            integrity.clone(),
            health.clone(),
            Arc::clone(&clock),
        );
        let archiver = Archiver::new(
            Arc::clone(&store),
            audit.clone(),
            integrity.clone(),
            Arc::clone(&clock),
        );
        let recovery = RecoveryEngine::new(
            Arc::clone(&store),
            audit.clone(),
            snapshots.clone(),
            Arc::clone(&clock),
        );
        let business = BusinessDataValidator::new(Arc::clone(&store), options.business_rules);
        let safeguards = SafeguardOrchestrator::new(
            Arc::clone(&store),
            health.clone(),
            integrity.clone(),
            snapshots.clone(),
            business.clone(),
            operations,
            Arc::clone(&clock),
        );
        let ledger = RequestLedger::new(Arc::clone(&store), audit.clone(), Arc::clone(&clock));
        let monitor = HealthMonitor::new(health.clone(), alerts, clock, options.monitor);

        Self {
            audit,
            health,
            integrity,
            snapshots,
            archiver,
            recovery,
            business,
            safeguards,
            ledger,
            monitor,
        }
    }

    /// Archive old dispatched requests behind the full safeguard flow.
    ///
    /// # Errors
    ///
    /// See [`SafeguardOrchestrator::execute_with_safeguards`].
    pub async fn archive_with_safeguards(
        &self,
        months_before_archive: u32,
    ) -> Result<SafeguardedOutcome<ArchiveOutcome>, SafeguardError<RetentionError>> {
        let archiver = self.archiver.clone();
        self.safeguards
            .execute_with_safeguards(
                "archive_dispatched_requests",
                json!({ "months_before_archive": months_before_archive }),
                move || async move { archiver.archive_dispatched_requests(months_before_archive).await },
            )
            .await
    }
}
