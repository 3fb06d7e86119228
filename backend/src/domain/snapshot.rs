//! Point-in-time backups of both request tables.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::RetentionError;
use crate::domain::health::{DatabaseHealth, HealthReport};
use crate::domain::integrity::{IntegrityChecker, IntegrityReport};
use crate::domain::ports::{RequestStore, SnapshotRepository, SnapshotRepositoryError};
use crate::domain::request::{ArchivedRequest, SampleRequest, serde_compat};

/// Fewest snapshots pruning will ever leave behind.
pub const MIN_RETAINED_SNAPSHOTS: usize = 3;

fn default_operation_type() -> String {
    "manual".to_owned()
}

/// Full export of both tables.
///
/// Older snapshot files lack the identity and report fields; they decode
/// with those fields empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Unique, sortable identifier.
    #[serde(default)]
    pub backup_id: String,
    /// When the snapshot was taken.
    #[serde(with = "serde_compat::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Why it was taken.
    #[serde(default = "default_operation_type")]
    pub operation_type: String,
    /// Arguments of the guarded operation.
    #[serde(default)]
    pub operation_details: Value,
    /// Health probe taken alongside.
    #[serde(default, deserialize_with = "serde_compat::lenient")]
    pub pre_operation_stats: Option<HealthReport>,
    /// Every active request.
    #[serde(default)]
    pub active_records: Vec<SampleRequest>,
    /// Every archive row.
    #[serde(default)]
    pub archived_records: Vec<ArchivedRequest>,
    /// Integrity check taken alongside.
    #[serde(default, deserialize_with = "serde_compat::lenient")]
    pub data_integrity_check: Option<IntegrityReport>,
}

impl BackupSnapshot {
    /// Active and archived row counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.active_records.len(), self.archived_records.len())
    }
}

/// Where a freshly written snapshot was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReceipt {
    /// Identifier of the snapshot.
    pub backup_id: String,
    /// Name to load it back by.
    pub name: String,
}

/// Unique, sortable snapshot identifier for `now`.
#[must_use]
pub fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let short = suffix.get(..8).unwrap_or(&suffix);
    format!("{}_{short}", now.format("%Y%m%d_%H%M%S_%6f"))
}

/// Captures, loads and prunes snapshots.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn RequestStore>,
    repository: Arc<dyn SnapshotRepository>,
    integrity: IntegrityChecker,
    health: DatabaseHealth,
    clock: Arc<dyn Clock>,
}

impl SnapshotService {
    /// Create a snapshot service.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        repository: Arc<dyn SnapshotRepository>,
        integrity: IntegrityChecker,
        health: DatabaseHealth,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            repository,
            integrity,
            health,
            clock,
        }
    }

    /// Export both tables with fresh health and integrity reports.
    pub async fn create_backup_snapshot(
        &self,
        operation_type: &str,
        operation_details: Value,
    ) -> Result<SnapshotReceipt, RetentionError> {
        let stats = self.health.check().await;
        self.capture(operation_type, operation_details, stats).await
    }

    /// Export both tables, recording `stats` as the pre-operation health.
    pub(crate) async fn capture(
        &self,
        operation_type: &str,
        operation_details: Value,
        stats: HealthReport,
    ) -> Result<SnapshotReceipt, RetentionError> {
        let integrity = self.integrity.perform_integrity_check().await;

        let mut tx = self.store.begin().await?;
        let rows = async {
            let active = tx.list_active().await?;
            let archived = tx.list_archived().await?;
            Ok::<_, RetentionError>((active, archived))
        }
        .await;
        if let Err(err) = tx.rollback().await {
            warn!(error = %err, "releasing snapshot read transaction failed");
        }
        let (active_records, archived_records) = rows?;

        let timestamp = self.clock.utc();
        let snapshot = BackupSnapshot {
            backup_id: new_backup_id(timestamp),
            timestamp,
            operation_type: operation_type.to_owned(),
            operation_details,
            pre_operation_stats: Some(stats),
            active_records,
            archived_records,
            data_integrity_check: Some(integrity),
        };
        let name = self.repository.save(&snapshot)?;
        info!(
            backup_id = %snapshot.backup_id,
            snapshot = %name,
            active = snapshot.active_records.len(),
            archived = snapshot.archived_records.len(),
            "backup snapshot written"
        );
        Ok(SnapshotReceipt {
            backup_id: snapshot.backup_id,
            name,
        })
    }

    /// Load a stored snapshot by name.
    pub fn load(&self, name: &str) -> Result<BackupSnapshot, SnapshotRepositoryError> {
        self.repository.load(name)
    }

    /// Stored snapshot names, oldest first.
    pub fn list(&self) -> Result<Vec<String>, SnapshotRepositoryError> {
        self.repository.list()
    }

    /// Delete old snapshots, never keeping fewer than
    /// [`MIN_RETAINED_SNAPSHOTS`].
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, SnapshotRepositoryError> {
        let removed = self.repository.prune(keep.max(MIN_RETAINED_SNAPSHOTS))?;
        if !removed.is_empty() {
            info!(removed = removed.len(), "pruned backup snapshots");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    //! Snapshot capture and decoding.
    use chrono::TimeZone;
    use mockall::predicate::eq;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::domain::audit::AuditTrail;
    use crate::domain::integrity::IntegrityStatus;
    use crate::domain::ports::{FixtureAuditLog, MockSnapshotRepository};
    use crate::test_support::requests::{archived_copy, dispatched_request, outstanding_request};
    use crate::test_support::{InMemoryRequestStore, MutableClock};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 30, 23, 59, 58)
            .single()
            .expect("valid timestamp")
    }

    fn service(
        store: InMemoryRequestStore,
        repository: MockSnapshotRepository,
        now: DateTime<Utc>,
    ) -> SnapshotService {
        let store: Arc<dyn RequestStore> = Arc::new(store);
        let clock: Arc<dyn Clock> = Arc::new(MutableClock::new(now));
        let audit = AuditTrail::new(Arc::new(FixtureAuditLog), Arc::clone(&clock));
        let integrity = IntegrityChecker::new(Arc::clone(&store), audit, Arc::clone(&clock));
        let health = DatabaseHealth::new(Arc::clone(&store), Arc::clone(&clock));
        SnapshotService::new(store, Arc::new(repository), integrity, health, clock)
    }

    #[rstest]
    fn backup_ids_sort_by_time_and_differ(now: DateTime<Utc>) {
        let first = new_backup_id(now);
        let second = new_backup_id(now);
        assert!(first.starts_with("20260630_235958_000000_"));
        assert_eq!(first.len(), "20260630_235958_000000_".len() + 8);
        assert_ne!(first, second);
    }

    #[rstest]
    #[tokio::test]
    async fn capture_exports_both_tables(now: DateTime<Utc>) {
        let store = InMemoryRequestStore::default();
        let old = dispatched_request(1, now - chrono::Duration::days(300));
        store.seed_archived(archived_copy(&old, now - chrono::Duration::days(100)));
        store.seed_active(outstanding_request(2, now));

        let mut repository = MockSnapshotRepository::new();
        repository
            .expect_save()
            .withf(|snapshot| {
                snapshot.counts() == (1, 1)
                    && snapshot.operation_type == "manual"
                    && snapshot
                        .data_integrity_check
                        .as_ref()
                        .is_some_and(|report| report.status == IntegrityStatus::Healthy)
                    && snapshot
                        .pre_operation_stats
                        .as_ref()
                        .is_some_and(HealthReport::is_healthy)
            })
            .times(1)
            .returning(|snapshot| Ok(format!("backup_snapshot_{}.json", snapshot.backup_id)));

        let receipt = service(store, repository, now)
            .create_backup_snapshot("manual", Value::Null)
            .await
            .expect("snapshot written");
        assert_eq!(receipt.name, format!("backup_snapshot_{}.json", receipt.backup_id));
    }

    #[rstest]
    #[tokio::test]
    async fn unreachable_store_fails_capture(now: DateTime<Utc>) {
        let store = InMemoryRequestStore::default();
        store.set_reachable(false);
        let mut repository = MockSnapshotRepository::new();
        repository.expect_save().never();

        let err = service(store, repository, now)
            .create_backup_snapshot("manual", Value::Null)
            .await
            .expect_err("store down");
        assert!(matches!(err, RetentionError::Store(_)));
    }

    #[rstest]
    fn prune_keeps_a_floor_of_three(now: DateTime<Utc>) {
        let mut repository = MockSnapshotRepository::new();
        repository
            .expect_prune()
            .with(eq(MIN_RETAINED_SNAPSHOTS))
            .times(1)
            .returning(|_| Ok(vec!["backup_snapshot_old.json".to_owned()]));

        let removed = service(InMemoryRequestStore::default(), repository, now)
            .prune(1)
            .expect("pruned");
        assert_eq!(removed, vec!["backup_snapshot_old.json".to_owned()]);
    }

    #[rstest]
    fn legacy_snapshot_decodes_without_identity() {
        let legacy = json!({
            "timestamp": "2025-03-01T10:00:00.123456",
            "active_records": [],
            "archived_records": [{
                "id": 3,
                "original_id": 17,
                "customer_name": "Grace Hopper",
                "email": "grace@example.org",
                "street_address": "1 Harbour Way",
                "city": "Arlington",
                "state_province": "VA",
                "postal_code": "22201",
                "country": "USA",
                "fabric_selections": "[\"Velvet Navy\"]",
                "status": "Dispatched",
                "date_submitted": "2024-09-01 09:00:00",
                "date_dispatched": "2024-09-03 09:00:00",
                "date_archived": "2025-01-03 09:00:00"
            }],
            "data_integrity_check": {"status": "healthy", "issues": ["free text issue"]}
        });

        let snapshot: BackupSnapshot = serde_json::from_value(legacy).expect("legacy snapshot");
        assert_eq!(snapshot.backup_id, "");
        assert_eq!(snapshot.operation_type, "manual");
        assert_eq!(snapshot.counts(), (0, 1));
        assert!(snapshot.data_integrity_check.is_none());
        assert_eq!(
            snapshot.archived_records[0].original_id,
            crate::domain::request::RequestId::new(17)
        );
    }
}
