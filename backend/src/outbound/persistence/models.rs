//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. They exist solely to satisfy Diesel's
//! type requirements for queries and mutations.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::ports::RequestStoreError;
use crate::domain::request::{
    ArchivedRequest, NewArchivedRequest, RequestDetails, RequestId, RequestStatus, SampleRequest,
    serde_compat,
};

use super::schema::{archived_requests, sample_requests};

fn parse_status(raw: &str) -> Result<RequestStatus, RequestStoreError> {
    raw.parse()
        .map_err(|err| RequestStoreError::query(format!("invalid status in database: {err}")))
}

fn selections_json(selections: &[String]) -> serde_json::Value {
    serde_json::Value::from(selections.to_vec())
}

/// Row struct for reading from the sample_requests table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = sample_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct SampleRequestRow {
    pub id: i64,
    pub customer_name: String,
    pub company_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub reference: Option<String>,
    pub street_address: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub fabric_selections: serde_json::Value,
    pub additional_notes: Option<String>,
    pub status: String,
    pub date_submitted: DateTime<Utc>,
    pub date_dispatched: Option<DateTime<Utc>>,
    pub supplier_notified: bool,
    pub supplier_notified_at: Option<DateTime<Utc>>,
}

impl SampleRequestRow {
    /// Row carrying an explicit id, used when restoring a request.
    #[must_use]
    pub fn from_request(request: &SampleRequest) -> Self {
        let NewSampleRequestRow {
            customer_name,
            company_name,
            email,
            phone,
            reference,
            street_address,
            city,
            state_province,
            postal_code,
            country,
            fabric_selections,
            additional_notes,
            status,
            date_submitted,
            date_dispatched,
            supplier_notified,
            supplier_notified_at,
        } = NewSampleRequestRow::from_details(&request.details);
        Self {
            id: request.id.get(),
            customer_name: customer_name.to_owned(),
            company_name: company_name.map(str::to_owned),
            email: email.to_owned(),
            phone: phone.map(str::to_owned),
            reference: reference.map(str::to_owned),
            street_address: street_address.to_owned(),
            city: city.to_owned(),
            state_province: state_province.to_owned(),
            postal_code: postal_code.to_owned(),
            country: country.to_owned(),
            fabric_selections,
            additional_notes: additional_notes.map(str::to_owned),
            status: status.to_owned(),
            date_submitted,
            date_dispatched,
            supplier_notified,
            supplier_notified_at,
        }
    }

    /// Convert into the domain type.
    pub fn into_domain(self) -> Result<SampleRequest, RequestStoreError> {
        Ok(SampleRequest {
            id: RequestId::new(self.id),
            details: RequestDetails {
                status: parse_status(&self.status)?,
                customer_name: self.customer_name,
                company_name: self.company_name,
                email: self.email,
                phone: self.phone,
                reference: self.reference,
                street_address: self.street_address,
                city: self.city,
                state_province: self.state_province,
                postal_code: self.postal_code,
                country: self.country,
                fabric_selections: serde_compat::selections_from_value(self.fabric_selections),
                additional_notes: self.additional_notes,
                date_submitted: self.date_submitted,
                date_dispatched: self.date_dispatched,
                supplier_notified: self.supplier_notified,
                supplier_notified_at: self.supplier_notified_at,
            },
        })
    }
}

/// Insertable struct for new active requests; the id is assigned by the
/// database. Also used as the changeset for updates.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = sample_requests)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct NewSampleRequestRow<'a> {
    pub customer_name: &'a str,
    pub company_name: Option<&'a str>,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub reference: Option<&'a str>,
    pub street_address: &'a str,
    pub city: &'a str,
    pub state_province: &'a str,
    pub postal_code: &'a str,
    pub country: &'a str,
    pub fabric_selections: serde_json::Value,
    pub additional_notes: Option<&'a str>,
    pub status: &'a str,
    pub date_submitted: DateTime<Utc>,
    pub date_dispatched: Option<DateTime<Utc>>,
    pub supplier_notified: bool,
    pub supplier_notified_at: Option<DateTime<Utc>>,
}

impl<'a> NewSampleRequestRow<'a> {
    #[must_use]
    pub fn from_details(details: &'a RequestDetails) -> Self {
        Self {
            customer_name: &details.customer_name,
            company_name: details.company_name.as_deref(),
            email: &details.email,
            phone: details.phone.as_deref(),
            reference: details.reference.as_deref(),
            street_address: &details.street_address,
            city: &details.city,
            state_province: &details.state_province,
            postal_code: &details.postal_code,
            country: &details.country,
            fabric_selections: selections_json(&details.fabric_selections),
            additional_notes: details.additional_notes.as_deref(),
            status: details.status.as_str(),
            date_submitted: details.date_submitted,
            date_dispatched: details.date_dispatched,
            supplier_notified: details.supplier_notified,
            supplier_notified_at: details.supplier_notified_at,
        }
    }
}

/// Row struct for reading from the archived_requests table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = archived_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ArchivedRequestRow {
    pub id: i64,
    pub original_id: i64,
    pub customer_name: String,
    pub company_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub reference: Option<String>,
    pub street_address: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub fabric_selections: serde_json::Value,
    pub additional_notes: Option<String>,
    pub status: String,
    pub date_submitted: DateTime<Utc>,
    pub date_dispatched: DateTime<Utc>,
    pub date_archived: DateTime<Utc>,
    pub supplier_notified: bool,
    pub supplier_notified_at: Option<DateTime<Utc>>,
}

impl ArchivedRequestRow {
    /// Convert into the domain type.
    pub fn into_domain(self) -> Result<ArchivedRequest, RequestStoreError> {
        Ok(ArchivedRequest {
            id: self.id,
            original_id: RequestId::new(self.original_id),
            date_archived: self.date_archived,
            details: RequestDetails {
                status: parse_status(&self.status)?,
                customer_name: self.customer_name,
                company_name: self.company_name,
                email: self.email,
                phone: self.phone,
                reference: self.reference,
                street_address: self.street_address,
                city: self.city,
                state_province: self.state_province,
                postal_code: self.postal_code,
                country: self.country,
                fabric_selections: serde_compat::selections_from_value(self.fabric_selections),
                additional_notes: self.additional_notes,
                date_submitted: self.date_submitted,
                date_dispatched: Some(self.date_dispatched),
                supplier_notified: self.supplier_notified,
                supplier_notified_at: self.supplier_notified_at,
            },
        })
    }
}

/// Insertable struct for archive rows.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = archived_requests)]
pub(crate) struct NewArchivedRequestRow<'a> {
    pub original_id: i64,
    pub customer_name: &'a str,
    pub company_name: Option<&'a str>,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub reference: Option<&'a str>,
    pub street_address: &'a str,
    pub city: &'a str,
    pub state_province: &'a str,
    pub postal_code: &'a str,
    pub country: &'a str,
    pub fabric_selections: serde_json::Value,
    pub additional_notes: Option<&'a str>,
    pub status: &'a str,
    pub date_submitted: DateTime<Utc>,
    pub date_dispatched: DateTime<Utc>,
    pub date_archived: DateTime<Utc>,
    pub supplier_notified: bool,
    pub supplier_notified_at: Option<DateTime<Utc>>,
}

impl<'a> NewArchivedRequestRow<'a> {
    /// Build an insertable row. Fails when the copy has no dispatch date,
    /// which the archive table does not allow.
    pub fn try_from_new(row: &'a NewArchivedRequest) -> Result<Self, RequestStoreError> {
        let details = &row.details;
        let date_dispatched = details.date_dispatched.ok_or_else(|| {
            RequestStoreError::query(format!(
                "archive row for {} has no dispatch date",
                row.original_id
            ))
        })?;
        Ok(Self {
            original_id: row.original_id.get(),
            customer_name: &details.customer_name,
            company_name: details.company_name.as_deref(),
            email: &details.email,
            phone: details.phone.as_deref(),
            reference: details.reference.as_deref(),
            street_address: &details.street_address,
            city: &details.city,
            state_province: &details.state_province,
            postal_code: &details.postal_code,
            country: &details.country,
            fabric_selections: selections_json(&details.fabric_selections),
            additional_notes: details.additional_notes.as_deref(),
            status: details.status.as_str(),
            date_submitted: details.date_submitted,
            date_dispatched,
            date_archived: row.date_archived,
            supplier_notified: details.supplier_notified,
            supplier_notified_at: details.supplier_notified_at,
        })
    }
}
