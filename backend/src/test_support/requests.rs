//! Builders for request fixtures.

use chrono::{DateTime, Duration, Utc};

use crate::domain::request::{
    NewArchivedRequest, RequestDetails, RequestDraft, RequestId, RequestStatus, SampleRequest,
};

/// A valid submission from `customer_name`.
#[must_use]
pub fn draft(customer_name: &str) -> RequestDraft {
    RequestDraft {
        customer_name: customer_name.to_owned(),
        company_name: Some(format!("{customer_name} Interiors")),
        email: format!(
            "{}@example.org",
            customer_name.to_ascii_lowercase().replace(' ', ".")
        ),
        phone: Some("01632 960000".to_owned()),
        reference: None,
        street_address: "4 Weaver Street".to_owned(),
        city: "Leeds".to_owned(),
        state_province: "West Yorkshire".to_owned(),
        postal_code: "LS1 4AP".to_owned(),
        country: "United Kingdom".to_owned(),
        fabric_selections: vec!["Linen Sage".to_owned(), "Velvet Navy".to_owned()],
        additional_notes: None,
    }
}

/// Outstanding details for `customer_name` submitted at `submitted_at`.
///
/// # Panics
///
/// Panics if the fixture draft no longer validates.
#[must_use]
pub fn request_details(customer_name: &str, submitted_at: DateTime<Utc>) -> RequestDetails {
    match draft(customer_name).into_details(submitted_at) {
        Ok(details) => details,
        Err(err) => panic!("fixture draft must validate: {err}"),
    }
}

/// Active request `id` dispatched at `dispatched_at`, submitted a week
/// earlier.
#[must_use]
pub fn dispatched_request(id: i64, dispatched_at: DateTime<Utc>) -> SampleRequest {
    let mut details = request_details(
        &format!("Customer {id}"),
        dispatched_at - Duration::days(7),
    );
    details.apply_status(RequestStatus::Dispatched, dispatched_at);
    SampleRequest {
        id: RequestId::new(id),
        details,
    }
}

/// Active outstanding request `id` submitted at `submitted_at`.
#[must_use]
pub fn outstanding_request(id: i64, submitted_at: DateTime<Utc>) -> SampleRequest {
    SampleRequest {
        id: RequestId::new(id),
        details: request_details(&format!("Customer {id}"), submitted_at),
    }
}

/// Archive row copying `request`, archived at `archived_at`.
#[must_use]
pub fn archived_copy(request: &SampleRequest, archived_at: DateTime<Utc>) -> NewArchivedRequest {
    NewArchivedRequest {
        original_id: request.id,
        date_archived: archived_at,
        details: request.details.clone(),
    }
}
