//! Unit tests for the safeguard flow.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::TimeZone;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::domain::RetentionError;
use crate::domain::audit::AuditTrail;
use crate::domain::business_validation::BusinessRules;
use crate::domain::ports::{
    FixtureAuditLog, MockSnapshotRepository, SnapshotRepository, SnapshotRepositoryError,
};
use crate::test_support::requests::{outstanding_request, request_details};
use crate::test_support::{
    InMemoryRequestStore, MemoryOperationsJournal, MemorySnapshotRepository, MutableClock,
};

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

struct Harness {
    store: InMemoryRequestStore,
    journal: Arc<MemoryOperationsJournal>,
    orchestrator: SafeguardOrchestrator,
}

fn harness_with(now: DateTime<Utc>, repository: Arc<dyn SnapshotRepository>) -> Harness {
    let store = InMemoryRequestStore::default();
    let shared: Arc<dyn RequestStore> = Arc::new(store.clone());
    let clock: Arc<dyn Clock> = Arc::new(MutableClock::new(now));
    let audit = AuditTrail::new(Arc::new(FixtureAuditLog), Arc::clone(&clock));
    let health = DatabaseHealth::new(Arc::clone(&shared), Arc::clone(&clock));
    let integrity = IntegrityChecker::new(Arc::clone(&shared), audit, Arc::clone(&clock));
    let snapshots = SnapshotService::new(
        Arc::clone(&shared),
        repository,
        integrity.clone(),
        health.clone(),
        Arc::clone(&clock),
    );
    let business = BusinessDataValidator::new(Arc::clone(&shared), BusinessRules::default());
    let journal = Arc::new(MemoryOperationsJournal::default());
    let orchestrator = SafeguardOrchestrator::new(
        shared,
        health,
        integrity,
        snapshots,
        business,
        Arc::clone(&journal) as Arc<dyn OperationsJournal>,
        clock,
    );
    Harness {
        store,
        journal,
        orchestrator,
    }
}

fn harness(now: DateTime<Utc>) -> Harness {
    harness_with(now, Arc::new(MemorySnapshotRepository::default()))
}

#[rstest]
#[tokio::test]
async fn successful_operation_is_backed_up_and_verified(now: DateTime<Utc>) {
    let h = harness(now);
    for id in 1..=3 {
        h.store.seed_active(outstanding_request(id, now));
    }
    let store = h.store.clone();

    let outcome = h
        .orchestrator
        .execute_with_safeguards("bulk_import", json!({"source": "test"}), move || async move {
            let mut tx = store.begin().await?;
            let created = tx.insert_request(&request_details("Ada Byron", now)).await?;
            tx.commit().await?;
            Ok::<_, RetentionError>(created.id)
        })
        .await
        .expect("safeguarded run");

    assert_eq!(outcome.operation_result.get(), 4);
    assert_eq!(outcome.verification.status, VerificationStatus::Success);
    assert!(outcome.verification.critical_issues.is_empty());
    assert_eq!(
        outcome.verification.backup_comparison,
        BackupComparison::Compared {
            backup_counts: TableCounts {
                active: 3,
                archived: 0
            },
            current_counts: TableCounts {
                active: 4,
                archived: 0
            },
            changes: CountChanges {
                active_records_change: 1,
                archived_records_change: 0,
                total_change: 1,
            },
        }
    );

    let journal = h.journal.snapshot();
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[0].operation, SafeguardStage::PreOperationBackup);
    assert_eq!(journal[0].status, "SUCCESS");
    assert_eq!(journal[0].backup_id, outcome.backup.backup_id);
    assert_eq!(journal[1].operation, SafeguardStage::PostOperationVerification);
    assert_eq!(journal[1].status, "success");
}

#[rstest]
#[tokio::test]
async fn unhealthy_database_blocks_the_operation(now: DateTime<Utc>) {
    let h = harness(now);
    h.store.set_reachable(false);
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);

    let err = h
        .orchestrator
        .execute_with_safeguards("archive", Value::Null, move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, RetentionError>(())
        })
        .await
        .expect_err("pre-flight must fail");

    assert!(matches!(err, SafeguardError::Preflight { .. }));
    assert!(!invoked.load(Ordering::SeqCst));
    let journal = h.journal.snapshot();
    assert_eq!(journal.len(), 1);
    assert!(journal[0].status.starts_with("FAILED: database unhealthy"));
}

#[rstest]
#[tokio::test]
async fn failed_snapshot_blocks_the_operation(now: DateTime<Utc>) {
    let mut repository = MockSnapshotRepository::new();
    repository
        .expect_save()
        .returning(|_| Err(SnapshotRepositoryError::io("disk full")));
    let h = harness_with(now, Arc::new(repository));
    h.store.seed_active(outstanding_request(1, now));
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);

    let err = h
        .orchestrator
        .execute_with_safeguards("archive", Value::Null, move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, RetentionError>(())
        })
        .await
        .expect_err("backup must fail");

    match err {
        SafeguardError::Preflight { message, .. } => assert!(message.contains("disk full")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!invoked.load(Ordering::SeqCst));
    assert!(h.journal.snapshot()[0].status.starts_with("FAILED"));
}

#[rstest]
#[tokio::test]
async fn operation_failure_names_the_backup(now: DateTime<Utc>) {
    let h = harness(now);
    h.store.seed_active(outstanding_request(1, now));

    let err = h
        .orchestrator
        .execute_with_safeguards("archive", Value::Null, || async {
            Err::<(), _>(RetentionError::encoding("boom"))
        })
        .await
        .expect_err("operation fails");

    match err {
        SafeguardError::Operation {
            backup_id, source, ..
        } => {
            assert!(!backup_id.is_empty());
            assert_eq!(source, RetentionError::encoding("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.journal.snapshot().len(), 1, "no verification after failure");
}

#[rstest]
#[tokio::test]
async fn contaminated_data_is_flagged_but_not_fatal(now: DateTime<Utc>) {
    let h = harness(now);
    let mut request = outstanding_request(1, now);
    request.details.company_name = Some("Test Company".to_owned());
    h.store.seed_active(request);

    let outcome = h
        .orchestrator
        .execute_with_safeguards("noop", Value::Null, || async { Ok::<_, RetentionError>(()) })
        .await
        .expect("post verification never fails the run");

    assert_eq!(outcome.verification.status, VerificationStatus::IssuesFound);
    assert!(
        outcome
            .verification
            .critical_issues
            .iter()
            .any(|issue| issue.starts_with("business data contamination"))
    );
    let journal = h.journal.snapshot();
    assert_eq!(journal[1].status, "issues_found");
}

#[rstest]
fn deltas_saturate() {
    assert_eq!(signed_delta(3, 5), -2);
    assert_eq!(signed_delta(u64::MAX, 0), i64::MAX);
}
