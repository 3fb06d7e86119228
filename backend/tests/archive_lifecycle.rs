//! End-to-end archive behaviour: retention cutoff, immutability and the
//! safeguard journal.

use chrono::Duration;
use rstest::rstest;
use sample_retention::domain::RetentionError;
use sample_retention::domain::audit::AuditOperation;
use sample_retention::domain::ledger::RequestLocation;
use sample_retention::domain::request::RequestStatus;
use sample_retention::domain::safeguards::{BackupComparison, SafeguardError, SafeguardStage};
use sample_retention::test_support::cap_fs::list_file_names;
use sample_retention::test_support::requests::{dispatched_request, draft};

mod support;

use support::{Harness, start};

#[rstest]
#[tokio::test]
async fn request_dispatched_150_days_ago_is_archived_and_frozen() {
    let h = Harness::new();
    let ledger = &h.services.ledger;
    let submitted = ledger.submit(draft("Ada Lovelace")).await.expect("submit");
    ledger
        .update_status(submitted.id, RequestStatus::Dispatched)
        .await
        .expect("dispatch");
    h.clock.advance_days(150);

    let outcome = h
        .services
        .archive_with_safeguards(4)
        .await
        .expect("safeguarded archive");

    assert_eq!(outcome.operation_result.archived_count, 1);
    assert!(!outcome.operation_result.rolled_back);
    assert!(h.store.active().is_empty());
    let archived = h.store.archived();
    assert_eq!(archived.len(), 1);
    assert_eq!(
        archived.first().map(|row| row.original_id),
        Some(submitted.id)
    );
    match outcome.verification.backup_comparison {
        BackupComparison::Compared { changes, .. } => {
            assert_eq!(changes.active_records_change, -1);
            assert_eq!(changes.archived_records_change, 1);
            assert_eq!(changes.total_change, 0);
        }
        BackupComparison::Unavailable { error } => panic!("comparison unavailable: {error}"),
    }

    assert_eq!(
        ledger.locate(submitted.id).await.expect("locate"),
        RequestLocation::Archived
    );
    let err = ledger
        .update_status(submitted.id, RequestStatus::InProgress)
        .await
        .expect_err("archived rows are immutable");
    assert!(matches!(err, RetentionError::ArchivedRecordImmutable { id } if id == submitted.id));

    let operations: Vec<AuditOperation> = h
        .services
        .audit
        .entries()
        .into_iter()
        .map(|entry| entry.operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            AuditOperation::Insert,
            AuditOperation::Update,
            AuditOperation::Archive
        ]
    );

    let journal = h.operations();
    assert_eq!(journal.len(), 2);
    let backup = journal.first().expect("backup record");
    assert_eq!(backup.operation, SafeguardStage::PreOperationBackup);
    assert_eq!(backup.status, "SUCCESS");
    assert_eq!(backup.backup_id, outcome.backup.backup_id);
    assert_eq!(
        journal.last().map(|record| record.operation),
        Some(SafeguardStage::PostOperationVerification)
    );

    let snapshots = list_file_names(&h.snapshot_dir()).expect("snapshot dir");
    assert_eq!(snapshots, vec![outcome.backup.name.clone()]);
}

#[rstest]
#[tokio::test]
async fn only_requests_past_the_cutoff_move() {
    let h = Harness::new();
    let old = dispatched_request(1, start() - Duration::days(200));
    let recent = dispatched_request(2, start() - Duration::days(10));
    h.store.seed_active(old.clone());
    h.store.seed_active(recent.clone());

    let outcome = h
        .services
        .archive_with_safeguards(4)
        .await
        .expect("safeguarded archive");

    assert_eq!(outcome.operation_result.archived_count, 1);
    assert_eq!(h.store.active(), vec![recent]);
    let archived: Vec<_> = h
        .store
        .archived()
        .into_iter()
        .map(|row| row.original_id)
        .collect();
    assert_eq!(archived, vec![old.id]);
}

#[rstest]
#[tokio::test]
async fn archive_copies_match_their_active_originals() {
    let h = Harness::new();
    let old = dispatched_request(7, start() - Duration::days(365));
    h.store.seed_active(old.clone());

    h.services
        .archive_with_safeguards(4)
        .await
        .expect("safeguarded archive");

    let row = h.store.archived().into_iter().next().expect("archived row");
    assert_eq!(row.original_id, old.id);
    assert_eq!(row.details, old.details);
    assert_eq!(row.date_archived, start());
}

#[rstest]
#[tokio::test]
async fn deletions_are_always_refused() {
    let h = Harness::new();
    let ledger = &h.services.ledger;
    let active = ledger.submit(draft("Grace Hopper")).await.expect("submit");
    let old = dispatched_request(50, start() - Duration::days(300));
    h.store.seed_active(old.clone());
    h.services
        .archive_with_safeguards(4)
        .await
        .expect("safeguarded archive");

    assert!(matches!(
        ledger.delete_request(active.id),
        Err(RetentionError::UnauthorizedDeletion { .. })
    ));
    assert!(matches!(
        ledger.delete_archived(old.id),
        Err(RetentionError::ArchivedRecordImmutable { .. })
    ));
    assert_eq!(h.store.active(), vec![active]);
    assert_eq!(h.store.archived().len(), 1);
}

#[rstest]
#[tokio::test]
async fn unreachable_database_blocks_archiving_before_any_backup() {
    let h = Harness::new();
    h.store.seed_active(dispatched_request(1, start() - Duration::days(200)));
    h.store.set_reachable(false);

    let err = h
        .services
        .archive_with_safeguards(4)
        .await
        .expect_err("pre-flight must fail");

    assert!(matches!(err, SafeguardError::Preflight { .. }));
    let journal = h.operations();
    assert_eq!(journal.len(), 1);
    assert!(
        journal
            .first()
            .is_some_and(|record| record.status.starts_with("FAILED"))
    );
    assert!(
        list_file_names(&h.snapshot_dir())
            .expect("snapshot dir")
            .is_empty()
    );
    h.store.set_reachable(true);
    assert_eq!(h.store.active().len(), 1);
}
