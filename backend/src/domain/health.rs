//! Database connectivity probe used as the safeguard pre-flight.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ports::{RequestStore, RequestStoreError, RequestTransaction, StatusCounts};
use crate::domain::request::serde_compat;

/// Health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The store answered and both tables were readable.
    Healthy,
    /// The probe failed; see the report error.
    Unhealthy,
}

/// Row counts across both tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    /// Active requests.
    pub total: u64,
    /// Active requests awaiting work.
    pub outstanding: u64,
    /// Active requests being cut.
    pub in_progress: u64,
    /// Active requests already sent.
    pub dispatched: u64,
    /// Rows in the archive table.
    pub archived: u64,
}

impl RecordCounts {
    /// Read counts through an open transaction.
    pub(crate) async fn read(
        tx: &mut dyn RequestTransaction,
    ) -> Result<Self, RequestStoreError> {
        let StatusCounts {
            outstanding,
            in_progress,
            dispatched,
        } = tx.count_by_status().await?;
        let archived = tx.count_archived().await?;
        Ok(Self {
            total: outstanding + in_progress + dispatched,
            outstanding,
            in_progress,
            dispatched,
            archived,
        })
    }

    /// Active plus archived requests.
    #[must_use]
    pub const fn all_records(&self) -> u64 {
        self.total + self.archived
    }
}

/// Outcome of one connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Probe verdict.
    pub status: HealthStatus,
    /// When the probe started.
    #[serde(with = "serde_compat::timestamp")]
    pub checked_at: DateTime<Utc>,
    /// Wall time of the probe.
    pub response_time_ms: u64,
    /// Table counts, when the probe succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<RecordCounts>,
    /// Failure message, when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    /// Whether the probe succeeded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probes connectivity and table reachability of the request store.
#[derive(Clone)]
pub struct DatabaseHealth {
    store: Arc<dyn RequestStore>,
    clock: Arc<dyn Clock>,
}

impl DatabaseHealth {
    /// Create a probe over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Ping the store, touch both tables and read counts.
    pub async fn check(&self) -> HealthReport {
        let checked_at = self.clock.utc();
        let started = Instant::now();
        let outcome = self.probe().await;
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(counts) => HealthReport {
                status: HealthStatus::Healthy,
                checked_at,
                response_time_ms,
                counts: Some(counts),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "database health check failed");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    checked_at,
                    response_time_ms,
                    counts: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn probe(&self) -> Result<RecordCounts, RequestStoreError> {
        self.store.ping().await?;
        let mut tx = self.store.begin().await?;
        let counts = async {
            tx.probe_tables().await?;
            RecordCounts::read(tx.as_mut()).await
        }
        .await;
        tx.rollback().await?;
        counts
    }
}

#[cfg(test)]
mod tests {
    //! Probe behaviour against the in-memory store.
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::domain::request::RequestStatus;
    use crate::test_support::{InMemoryRequestStore, MutableClock, requests::dispatched_request};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
        ))
    }

    #[rstest]
    #[tokio::test]
    async fn healthy_store_reports_counts() {
        let store = InMemoryRequestStore::default();
        let now = Utc::now();
        store.seed_active(dispatched_request(1, now));
        let mut outstanding = dispatched_request(2, now);
        outstanding.details.status = RequestStatus::Outstanding;
        outstanding.details.date_dispatched = None;
        store.seed_active(outstanding);

        let health = DatabaseHealth::new(Arc::new(store), clock());
        let report = health.check().await;

        assert!(report.is_healthy());
        let counts = report.counts.expect("counts present");
        assert_eq!(counts.total, 2);
        assert_eq!(counts.dispatched, 1);
        assert_eq!(counts.outstanding, 1);
        assert_eq!(counts.archived, 0);
    }

    #[rstest]
    #[tokio::test]
    async fn unreachable_store_is_unhealthy() {
        let store = InMemoryRequestStore::default();
        store.set_reachable(false);

        let health = DatabaseHealth::new(Arc::new(store), clock());
        let report = health.check().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.counts.is_none());
        assert!(report.error.is_some_and(|message| message.contains("connection")));
    }
}
