//! PostgreSQL-backed `RequestStore` implementation using Diesel ORM.
//!
//! Each [`RequestTransaction`] owns a pooled connection with an open
//! transaction started through Diesel's transaction manager. Named
//! savepoints are issued as plain SQL inside that transaction. A
//! transaction dropped without commit or rollback is discarded together
//! with its connection.
//!
//! Requests restored under their original id bump the id sequence so later
//! inserts never reuse an id that already exists in either table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AnsiTransactionManager, RunQueryDsl, TransactionManager};
use tracing::debug;

use crate::domain::ports::{
    ArchiveToken, RequestStore, RequestStoreError, RequestTransaction, StatusCounts,
};
use crate::domain::request::{
    ArchivedRequest, NewArchivedRequest, RequestDetails, RequestId, RequestStatus, SampleRequest,
};

use super::diesel_basic_error_mapping::{map_diesel_error, map_pool_error};
use super::models::{
    ArchivedRequestRow, NewArchivedRequestRow, NewSampleRequestRow, SampleRequestRow,
};
use super::pool::{DbPool, OwnedConnection};
use super::schema::{archived_requests, sample_requests};

const SYNC_REQUEST_SEQUENCE: &str = "SELECT setval('sample_requests_id_seq', GREATEST(\
     (SELECT last_value FROM sample_requests_id_seq), \
     (SELECT COALESCE(MAX(id), 0) FROM sample_requests), \
     (SELECT COALESCE(MAX(original_id), 0) FROM archived_requests), 1))";

/// Diesel-backed implementation of the `RequestStore` port.
#[derive(Clone)]
pub struct DieselRequestStore {
    pool: DbPool,
}

impl DieselRequestStore {
    /// Create a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestStore for DieselRequestStore {
    async fn ping(&self) -> Result<(), RequestStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn RequestTransaction>, RequestStoreError> {
        let mut conn = self.pool.get_owned().await.map_err(map_pool_error)?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(Box::new(DieselRequestTransaction { conn }))
    }
}

struct DieselRequestTransaction {
    conn: OwnedConnection,
}

fn valid_savepoint(name: &str) -> Result<&str, RequestStoreError> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|first| first.is_ascii_alphabetic());
    if starts_with_letter && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(RequestStoreError::unknown_savepoint(name))
    }
}

fn to_count(raw: i64) -> Result<u64, RequestStoreError> {
    u64::try_from(raw).map_err(|_| RequestStoreError::query(format!("negative row count {raw}")))
}

impl DieselRequestTransaction {
    async fn run_sql(&mut self, sql: &str) -> Result<(), RequestStoreError> {
        debug!(sql, "request store statement");
        diesel::sql_query(sql)
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }
}

#[async_trait]
impl RequestTransaction for DieselRequestTransaction {
    async fn list_active(&mut self) -> Result<Vec<SampleRequest>, RequestStoreError> {
        let rows: Vec<SampleRequestRow> = sample_requests::table
            .order(sample_requests::id.asc())
            .select(SampleRequestRow::as_select())
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(SampleRequestRow::into_domain).collect()
    }

    async fn list_archived(&mut self) -> Result<Vec<ArchivedRequest>, RequestStoreError> {
        let rows: Vec<ArchivedRequestRow> = archived_requests::table
            .order(archived_requests::original_id.asc())
            .select(ArchivedRequestRow::as_select())
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(ArchivedRequestRow::into_domain).collect()
    }

    async fn active_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError> {
        let ids: Vec<i64> = sample_requests::table
            .select(sample_requests::id)
            .order(sample_requests::id.asc())
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(ids.into_iter().map(RequestId::new).collect())
    }

    async fn archived_original_ids(&mut self) -> Result<Vec<RequestId>, RequestStoreError> {
        let ids: Vec<i64> = archived_requests::table
            .select(archived_requests::original_id)
            .order(archived_requests::original_id.asc())
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(ids.into_iter().map(RequestId::new).collect())
    }

    async fn count_by_status(&mut self) -> Result<StatusCounts, RequestStoreError> {
        let grouped: Vec<(String, i64)> = sample_requests::table
            .group_by(sample_requests::status)
            .select((sample_requests::status, diesel::dsl::count_star()))
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;

        let mut counts = StatusCounts::default();
        for (raw, count) in grouped {
            let status: RequestStatus = raw.parse().map_err(|err| {
                RequestStoreError::query(format!("invalid status in database: {err}"))
            })?;
            let slot = match status {
                RequestStatus::Outstanding => &mut counts.outstanding,
                RequestStatus::InProgress => &mut counts.in_progress,
                RequestStatus::Dispatched => &mut counts.dispatched,
            };
            *slot += to_count(count)?;
        }
        Ok(counts)
    }

    async fn count_archived(&mut self) -> Result<u64, RequestStoreError> {
        let count: i64 = archived_requests::table
            .count()
            .get_result(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        to_count(count)
    }

    async fn count_stale_dispatched(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RequestStoreError> {
        let count: i64 = sample_requests::table
            .filter(sample_requests::status.eq(RequestStatus::Dispatched.as_str()))
            .filter(sample_requests::date_dispatched.lt(cutoff))
            .count()
            .get_result(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        to_count(count)
    }

    async fn probe_tables(&mut self) -> Result<(), RequestStoreError> {
        sample_requests::table
            .select(sample_requests::id)
            .limit(1)
            .load::<i64>(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        archived_requests::table
            .select(archived_requests::id)
            .limit(1)
            .load::<i64>(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }

    async fn find_active(
        &mut self,
        id: RequestId,
    ) -> Result<Option<SampleRequest>, RequestStoreError> {
        sample_requests::table
            .find(id.get())
            .select(SampleRequestRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(SampleRequestRow::into_domain)
            .transpose()
    }

    async fn find_archived(
        &mut self,
        original_id: RequestId,
    ) -> Result<Option<ArchivedRequest>, RequestStoreError> {
        archived_requests::table
            .filter(archived_requests::original_id.eq(original_id.get()))
            .select(ArchivedRequestRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(ArchivedRequestRow::into_domain)
            .transpose()
    }

    async fn lock_archive_candidates(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SampleRequest>, RequestStoreError> {
        let rows: Vec<SampleRequestRow> = sample_requests::table
            .filter(sample_requests::status.eq(RequestStatus::Dispatched.as_str()))
            .filter(sample_requests::date_dispatched.lt(cutoff))
            .order(sample_requests::id.asc())
            .select(SampleRequestRow::as_select())
            .for_update()
            .load(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(SampleRequestRow::into_domain).collect()
    }

    async fn insert_request(
        &mut self,
        details: &RequestDetails,
    ) -> Result<SampleRequest, RequestStoreError> {
        let row: SampleRequestRow = diesel::insert_into(sample_requests::table)
            .values(NewSampleRequestRow::from_details(details))
            .returning(SampleRequestRow::as_returning())
            .get_result(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        row.into_domain()
    }

    async fn restore_request(&mut self, request: &SampleRequest) -> Result<(), RequestStoreError> {
        diesel::insert_into(sample_requests::table)
            .values(SampleRequestRow::from_request(request))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        self.run_sql(SYNC_REQUEST_SEQUENCE).await
    }

    async fn update_request(
        &mut self,
        id: RequestId,
        details: &RequestDetails,
    ) -> Result<Option<SampleRequest>, RequestStoreError> {
        diesel::update(sample_requests::table.find(id.get()))
            .set(NewSampleRequestRow::from_details(details))
            .returning(SampleRequestRow::as_returning())
            .get_result(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(SampleRequestRow::into_domain)
            .transpose()
    }

    async fn insert_archived(
        &mut self,
        row: &NewArchivedRequest,
    ) -> Result<ArchivedRequest, RequestStoreError> {
        let stored: ArchivedRequestRow = diesel::insert_into(archived_requests::table)
            .values(NewArchivedRequestRow::try_from_new(row)?)
            .returning(ArchivedRequestRow::as_returning())
            .get_result(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        self.run_sql(SYNC_REQUEST_SEQUENCE).await?;
        stored.into_domain()
    }

    async fn delete_active(&mut self, token: &ArchiveToken) -> Result<bool, RequestStoreError> {
        let removed = diesel::delete(sample_requests::table.find(token.original_id().get()))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(removed > 0)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        let checked = valid_savepoint(name)?;
        self.run_sql(&format!("SAVEPOINT {checked}")).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        let checked = valid_savepoint(name)?;
        self.run_sql(&format!("RELEASE SAVEPOINT {checked}")).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), RequestStoreError> {
        let checked = valid_savepoint(name)?;
        self.run_sql(&format!("ROLLBACK TO SAVEPOINT {checked}")).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), RequestStoreError> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel_error)
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), RequestStoreError> {
        AnsiTransactionManager::rollback_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel_error)
    }
}
