//! Audit trail of mutations applied to request records.
//!
//! Every insert, update and archive writes an [`AuditEntry`] carrying the
//! full record snapshot and a SHA-256 checksum of its canonical JSON form.
//! The trail is the source of truth for reconciliation: a request that was
//! logged but exists in neither table can be rebuilt from its latest entry.
//!
//! Writing is best effort. A failed append is logged and swallowed so that a
//! journal outage never undoes a committed mutation.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::domain::ports::AuditLog;
use crate::domain::request::{RequestId, serde_compat};

/// Kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    /// An active request was created.
    Insert,
    /// An active request changed.
    Update,
    /// A request moved to the archive table.
    Archive,
}

impl AuditOperation {
    /// Whether an entry of this kind describes a live active row.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Archive => "archive",
        })
    }
}

/// Table an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditTable {
    /// The active requests table.
    #[serde(rename = "sample_request", alias = "SampleRequest")]
    SampleRequest,
    /// The archive table.
    #[serde(rename = "archived_request", alias = "ArchivedRequest")]
    ArchivedRequest,
}

impl fmt::Display for AuditTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SampleRequest => "sample_request",
            Self::ArchivedRequest => "archived_request",
        })
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the mutation was recorded.
    #[serde(with = "serde_compat::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Kind of mutation.
    pub operation: AuditOperation,
    /// Table the mutation applied to.
    pub table: AuditTable,
    /// Logical request id.
    pub record_id: RequestId,
    /// Full record snapshot after the mutation.
    pub data: Value,
    /// Hex SHA-256 of `data`.
    pub checksum: String,
}

impl AuditEntry {
    /// Build an entry, computing the checksum of `data`.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        operation: AuditOperation,
        table: AuditTable,
        record_id: RequestId,
        data: Value,
    ) -> Self {
        let checksum = content_checksum(&data);
        Self {
            timestamp,
            operation,
            table,
            record_id,
            data,
            checksum,
        }
    }

    /// Whether the stored checksum still matches the snapshot.
    ///
    /// Entries written before the JSON-lines journal hashed the spaced
    /// `", "`/`": "` encoding with non-ASCII escaped; that form is accepted
    /// too.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        content_checksum(&self.data) == self.checksum
            || legacy_checksum(&self.data).is_some_and(|legacy| legacy == self.checksum)
    }
}

/// Lowercase hex SHA-256 of the canonical JSON encoding of `value`.
///
/// Object keys are sorted recursively, so field order does not affect the
/// result.
#[must_use]
pub fn content_checksum(value: &Value) -> String {
    let canonical = canonicalize(value);
    let bytes = canonical.to_string();
    hex::encode(Sha256::digest(bytes.as_bytes()))
}

/// Checksum over the spaced, ASCII-escaped encoding of legacy entries.
fn legacy_checksum(value: &Value) -> Option<String> {
    let mut bytes = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, LegacyFormatter);
    canonicalize(value).serialize(&mut serializer).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}

/// Compact JSON with a space after each separator and `\uXXXX` escapes for
/// every character outside printable ASCII.
struct LegacyFormatter;

impl Formatter for LegacyFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\u{7f}' {
                let mut buf = [0_u8; 1];
                writer.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
            } else {
                let mut units = [0_u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by_key(|(key, _)| key.as_str());
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), canonicalize(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Domain service over the audit log port.
#[derive(Clone)]
pub struct AuditTrail {
    log: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    /// Create a trail writing to `log`.
    #[must_use]
    pub fn new(log: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self { log, clock }
    }

    /// Record a mutation of `record_id`. Failures are logged, never raised.
    pub fn record<T: Serialize>(
        &self,
        operation: AuditOperation,
        table: AuditTable,
        record_id: RequestId,
        data: &T,
    ) {
        let snapshot = match serde_json::to_value(data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%record_id, %operation, error = %err, "audit snapshot encoding failed");
                return;
            }
        };
        let entry = AuditEntry::new(self.clock.utc(), operation, table, record_id, snapshot);
        if let Err(err) = self.log.append(&entry) {
            error!(%record_id, %operation, %table, error = %err, "audit log write failed");
        }
    }

    /// Every retained entry; an unreadable log reads as empty.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.log.entries().unwrap_or_else(|err| {
            warn!(error = %err, "audit log unreadable; treating history as empty");
            Vec::new()
        })
    }

    /// The most recent entry for `record_id`, if any.
    #[must_use]
    pub fn find_latest(&self, record_id: RequestId) -> Option<AuditEntry> {
        self.entries()
            .into_iter()
            .rev()
            .find(|entry| entry.record_id == record_id)
    }

    /// Ids of active-table records that were ever inserted or updated.
    #[must_use]
    pub fn logged_request_ids(&self) -> BTreeSet<RequestId> {
        self.entries()
            .into_iter()
            .filter(|entry| {
                entry.table == AuditTable::SampleRequest && entry.operation.is_recoverable()
            })
            .map(|entry| entry.record_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    //! Unit coverage for checksums and the trail service.
    use chrono::TimeZone;
    use mockall::predicate::always;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::domain::ports::{JournalError, MockAuditLog};
    use crate::test_support::MutableClock;

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn entry(id: i64, operation: AuditOperation, table: AuditTable) -> AuditEntry {
        AuditEntry::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0)
                .single()
                .expect("valid timestamp"),
            operation,
            table,
            RequestId::new(id),
            json!({"id": id, "customer_name": format!("Customer {id}")}),
        )
    }

    #[rstest]
    fn checksum_ignores_key_order() {
        let a = json!({"b": [1, {"y": 2, "x": 1}], "a": "v"});
        let b = json!({"a": "v", "b": [1, {"x": 1, "y": 2}]});
        assert_eq!(content_checksum(&a), content_checksum(&b));
        assert_eq!(content_checksum(&a).len(), 64);
    }

    #[rstest]
    fn checksum_detects_tampering() {
        let mut logged = entry(3, AuditOperation::Insert, AuditTable::SampleRequest);
        assert!(logged.checksum_matches());
        logged.data["customer_name"] = json!("Someone else");
        assert!(!logged.checksum_matches());
    }

    #[rstest]
    fn record_appends_stamped_entry(now: DateTime<Utc>) {
        let mut log = MockAuditLog::new();
        log.expect_append()
            .withf(move |entry| {
                entry.timestamp == now
                    && entry.record_id == RequestId::new(9)
                    && entry.operation == AuditOperation::Update
                    && entry.checksum_matches()
            })
            .times(1)
            .returning(|_| Ok(()));
        let trail = AuditTrail::new(Arc::new(log), Arc::new(MutableClock::new(now)));

        trail.record(
            AuditOperation::Update,
            AuditTable::SampleRequest,
            RequestId::new(9),
            &json!({"id": 9}),
        );
    }

    #[rstest]
    fn record_swallows_write_failures(now: DateTime<Utc>) {
        let mut log = MockAuditLog::new();
        log.expect_append()
            .with(always())
            .times(1)
            .returning(|_| Err(JournalError::io("disk full")));
        let trail = AuditTrail::new(Arc::new(log), Arc::new(MutableClock::new(now)));

        trail.record(
            AuditOperation::Insert,
            AuditTable::SampleRequest,
            RequestId::new(1),
            &json!({"id": 1}),
        );
    }

    #[rstest]
    fn unreadable_log_reads_as_empty(now: DateTime<Utc>) {
        let mut log = MockAuditLog::new();
        log.expect_entries()
            .returning(|| Err(JournalError::io("corrupt")));
        let trail = AuditTrail::new(Arc::new(log), Arc::new(MutableClock::new(now)));

        assert!(trail.entries().is_empty());
        assert!(trail.find_latest(RequestId::new(1)).is_none());
        assert!(trail.logged_request_ids().is_empty());
    }

    #[rstest]
    fn find_latest_scans_newest_first(now: DateTime<Utc>) {
        let mut older = entry(4, AuditOperation::Insert, AuditTable::SampleRequest);
        older.data["customer_name"] = json!("First");
        let newer = entry(4, AuditOperation::Update, AuditTable::SampleRequest);
        let other = entry(5, AuditOperation::Insert, AuditTable::SampleRequest);
        let history = vec![older, newer.clone(), other];

        let mut log = MockAuditLog::new();
        log.expect_entries().returning(move || Ok(history.clone()));
        let trail = AuditTrail::new(Arc::new(log), Arc::new(MutableClock::new(now)));

        assert_eq!(trail.find_latest(RequestId::new(4)), Some(newer));
        assert!(trail.find_latest(RequestId::new(99)).is_none());
    }

    #[rstest]
    fn logged_ids_skip_archive_operations(now: DateTime<Utc>) {
        let history = vec![
            entry(1, AuditOperation::Insert, AuditTable::SampleRequest),
            entry(2, AuditOperation::Update, AuditTable::SampleRequest),
            entry(3, AuditOperation::Archive, AuditTable::ArchivedRequest),
            entry(4, AuditOperation::Insert, AuditTable::ArchivedRequest),
        ];
        let mut log = MockAuditLog::new();
        log.expect_entries().returning(move || Ok(history.clone()));
        let trail = AuditTrail::new(Arc::new(log), Arc::new(MutableClock::new(now)));

        let ids: Vec<_> = trail.logged_request_ids().into_iter().collect();
        assert_eq!(ids, vec![RequestId::new(1), RequestId::new(2)]);
    }

    #[rstest]
    fn spaced_ascii_escaped_checksums_are_accepted() {
        let data = json!({"b": [1, "\u{e9}"], "a": "x"});
        let mut logged = entry(8, AuditOperation::Insert, AuditTable::SampleRequest);
        logged.data = data;
        logged.checksum =
            "c0abf334167c445574bec297ec8a843e199ce02dbe6f37a999df4a612f91eb40".to_owned();
        assert!(logged.checksum_matches());

        logged.data["a"] = json!("y");
        assert!(!logged.checksum_matches());
    }

    #[rstest]
    #[case("SampleRequest", AuditTable::SampleRequest)]
    #[case("sample_request", AuditTable::SampleRequest)]
    #[case("ArchivedRequest", AuditTable::ArchivedRequest)]
    #[case("archived_request", AuditTable::ArchivedRequest)]
    fn table_names_from_either_layout_decode(#[case] raw: &str, #[case] expected: AuditTable) {
        let decoded: AuditTable = serde_json::from_value(json!(raw)).expect("decode table");
        assert_eq!(decoded, expected);
        assert_eq!(
            serde_json::to_value(decoded).expect("encode table"),
            json!(expected.to_string())
        );
    }

    #[rstest]
    fn entry_encoding_is_stable() {
        let logged = entry(7, AuditOperation::Archive, AuditTable::ArchivedRequest);
        let value = serde_json::to_value(&logged).expect("encode");
        assert_eq!(value["operation"], json!("archive"));
        assert_eq!(value["table"], json!("archived_request"));
        assert_eq!(value["record_id"], json!(7));
    }
}
