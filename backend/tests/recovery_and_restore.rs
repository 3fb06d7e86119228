//! Rebuilding lost requests from the audit log and from snapshots.

use chrono::{Duration, TimeZone, Utc};
use rstest::rstest;
use sample_retention::domain::audit::{AuditEntry, AuditOperation, AuditTable};
use sample_retention::domain::monitor::MonitorSettings;
use sample_retention::domain::recovery::RecoveryFailure;
use sample_retention::domain::request::{RequestId, RequestStatus};
use sample_retention::test_support::cap_fs::{read_file_to_string, write_file};
use sample_retention::test_support::requests::{
    archived_copy, dispatched_request, draft, outstanding_request,
};
use serde_json::json;
use tempfile::TempDir;

mod support;

use support::{AUDIT_FILE, Harness, start};

#[rstest]
#[tokio::test]
async fn audit_recovery_restores_the_latest_logged_state() {
    let h = Harness::new();
    let ledger = &h.services.ledger;
    let submitted = ledger.submit(draft("Ada Lovelace")).await.expect("submit");
    h.clock.advance_days(2);
    let notified = ledger
        .mark_supplier_notified(submitted.id)
        .await
        .expect("notify");
    h.store.lose_active(submitted.id).expect("row existed");

    let recovered = h
        .services
        .recovery
        .recover_from_audit(submitted.id)
        .await
        .expect("recovery");

    assert_eq!(recovered, notified);
    assert_eq!(h.store.active(), vec![notified]);
}

#[rstest]
#[tokio::test]
async fn full_scan_recovers_every_lost_request() {
    let h = Harness::new();
    let ledger = &h.services.ledger;
    let first = ledger.submit(draft("Ada Lovelace")).await.expect("submit");
    let second = ledger.submit(draft("Grace Hopper")).await.expect("submit");
    h.store.lose_active(first.id).expect("row existed");
    h.store.lose_active(second.id).expect("row existed");

    let report = h.services.recovery.perform_full_recovery_scan().await;

    assert_eq!(report.missing_from_store, vec![first.id, second.id]);
    assert_eq!(report.recovered, vec![first.id, second.id]);
    assert!(report.failed_recoveries.is_empty());
    assert_eq!(h.store.active(), vec![first, second]);
}

#[rstest]
#[tokio::test]
async fn restore_is_additive_and_idempotent() {
    let h = Harness::new();
    let ledger = &h.services.ledger;
    let kept = ledger.submit(draft("Ada Lovelace")).await.expect("submit");
    let lost = ledger.submit(draft("Grace Hopper")).await.expect("submit");
    let receipt = h
        .services
        .snapshots
        .create_backup_snapshot("manual", json!({ "reason": "before cleanup" }))
        .await
        .expect("snapshot");
    h.store.lose_active(lost.id).expect("row existed");

    let first = h
        .services
        .recovery
        .restore_from_backup(&receipt.name)
        .await
        .expect("first restore");
    assert_eq!(first.restored_active, vec![lost.id]);
    assert_eq!(first.already_present, 1);
    assert!(first.conflicts.is_empty());

    let second = h
        .services
        .recovery
        .restore_from_backup(&receipt.name)
        .await
        .expect("second restore");
    assert!(second.restored_active.is_empty());
    assert_eq!(second.already_present, 2);
    assert_eq!(h.store.active(), vec![kept, lost]);
}

#[rstest]
#[tokio::test]
async fn restore_never_revives_an_archived_request_as_active() {
    let h = Harness::new();
    let old = dispatched_request(3, start() - Duration::days(300));
    h.store.seed_active(old.clone());
    let receipt = h
        .services
        .snapshots
        .create_backup_snapshot("manual", json!({}))
        .await
        .expect("snapshot");
    h.services
        .archive_with_safeguards(4)
        .await
        .expect("safeguarded archive");

    let report = h
        .services
        .recovery
        .restore_from_backup(&receipt.name)
        .await
        .expect("restore");

    assert!(report.restored_active.is_empty());
    assert_eq!(
        report.conflicts.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![old.id]
    );
    assert!(h.store.active().is_empty());
    assert_eq!(h.store.archived().len(), 1);
}

#[rstest]
#[tokio::test]
async fn corrupt_audit_lines_do_not_block_recovery() {
    let dir = TempDir::new().expect("tempdir");
    let request = outstanding_request(42, start());
    let good = AuditEntry::new(
        start(),
        AuditOperation::Insert,
        AuditTable::SampleRequest,
        request.id,
        serde_json::to_value(&request).expect("encode request"),
    );
    let mut tampered = AuditEntry::new(
        start(),
        AuditOperation::Insert,
        AuditTable::SampleRequest,
        RequestId::new(43),
        serde_json::to_value(outstanding_request(43, start())).expect("encode request"),
    );
    tampered.data["customer_name"] = json!("Mallory");
    let contents = format!(
        "not json at all\n{}\n{{\"timestamp\": \"trunc\n{}\n",
        serde_json::to_string(&good).expect("encode entry"),
        serde_json::to_string(&tampered).expect("encode entry"),
    );
    write_file(&dir.path().join(AUDIT_FILE), contents.as_bytes()).expect("seed audit log");

    let h = Harness::in_dir(dir, MonitorSettings::default());
    assert_eq!(h.services.audit.entries().len(), 2);

    let recovered = h
        .services
        .recovery
        .recover_from_audit(request.id)
        .await
        .expect("valid entry recovers");
    assert_eq!(recovered, request);

    let refused = h
        .services
        .recovery
        .recover_from_audit(RequestId::new(43))
        .await
        .expect_err("tampered entry is refused");
    assert!(matches!(refused, RecoveryFailure::ChecksumMismatch { .. }));
    assert_eq!(h.store.active(), vec![request]);
}

#[rstest]
#[tokio::test]
async fn restore_rolls_back_everything_when_one_row_fails() {
    let source = Harness::new();
    let archived = dispatched_request(6, start() - Duration::days(200));
    source.store.seed_active(outstanding_request(5, start()));
    source
        .store
        .seed_archived(archived_copy(&archived, start() - Duration::days(60)));
    let receipt = source
        .services
        .snapshots
        .create_backup_snapshot("manual", json!({}))
        .await
        .expect("snapshot");
    let contents = read_file_to_string(&source.snapshot_dir().join(&receipt.name))
        .expect("read snapshot");

    let h = Harness::new();
    write_file(&h.snapshot_dir().join(&receipt.name), contents.as_bytes())
        .expect("copy snapshot");
    h.store.inject_archive_failure(archived.id);

    let result = h.services.recovery.restore_from_backup(&receipt.name).await;

    assert!(result.is_err());
    assert!(h.store.active().is_empty());
    assert!(h.store.archived().is_empty());
    assert!(h.services.audit.entries().is_empty());
}

/// Audit file in the whole-array layout that predates the JSON-lines
/// journal, with checksums over the spaced, ASCII-escaped encoding.
const LEGACY_AUDIT_FILE: &str = r#"[
  {
    "timestamp": "2025-11-02T14:05:01.250000",
    "operation": "insert",
    "table": "SampleRequest",
    "record_id": 42,
    "data": {
      "id": 42,
      "customer_name": "Zo\u00eb Weaver",
      "email": "zoe@example.com, orders@example.com",
      "phone": null,
      "company_name": "Loom & Co",
      "street_address": "1 Mill Lane",
      "city": "Leeds",
      "state_province": "West Yorkshire",
      "postal_code": "LS1 1AA",
      "country": "UK",
      "fabric_selections": "[\"Linen - Natural\", \"Wool - Charcoal\"]",
      "additional_notes": null,
      "status": "In Progress",
      "date_submitted": "2025-11-02 14:05:00",
      "date_dispatched": null
    },
    "checksum": "171cd4044db61b70a1c49bfaf9c0dcccc41743a14d7a2beadb1e775c6ecf835c"
  }
]
"#;

#[rstest]
#[tokio::test]
async fn legacy_audit_file_feeds_reconciliation_and_recovery() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join(AUDIT_FILE), LEGACY_AUDIT_FILE.as_bytes())
        .expect("seed legacy audit log");
    let h = Harness::in_dir(dir, MonitorSettings::default());
    let id = RequestId::new(42);

    let entries = h.services.audit.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries.iter().all(AuditEntry::checksum_matches));
    assert_eq!(
        h.services.audit.logged_request_ids().into_iter().collect::<Vec<_>>(),
        vec![id]
    );

    let recovered = h
        .services
        .recovery
        .recover_from_audit(id)
        .await
        .expect("legacy entry recovers");

    assert_eq!(recovered.id, id);
    assert_eq!(recovered.details.customer_name, "Zo\u{eb} Weaver");
    assert_eq!(recovered.details.status, RequestStatus::InProgress);
    assert_eq!(
        recovered.details.fabric_selections,
        vec!["Linen - Natural".to_owned(), "Wool - Charcoal".to_owned()]
    );
    assert_eq!(
        recovered.details.date_submitted,
        Utc.with_ymd_and_hms(2025, 11, 2, 14, 5, 0)
            .single()
            .expect("valid timestamp")
    );
    assert_eq!(h.store.active(), vec![recovered]);
}
