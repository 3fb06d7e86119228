//! Sample request records held in the active and archive tables.
//!
//! A logical request is identified by its [`RequestId`]. While it is active
//! it lives as a [`SampleRequest`]; once archived it lives as an
//! [`ArchivedRequest`] whose `original_id` carries the same identifier. The
//! shared field set is [`RequestDetails`], so archiving is a copy of the
//! details plus archive metadata.
//!
//! Serialisation is the snapshot format used by the audit log and backup
//! files. Decoding also accepts the legacy layout (space-separated
//! timestamps, fabric selections stored as JSON text, `iliv_email_sent`
//! naming for the supplier flag).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) mod serde_compat;

/// Database-assigned identity of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    /// Wrap a raw database identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw database identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Workflow status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Submitted, not yet picked up.
    #[serde(rename = "Outstanding")]
    Outstanding,
    /// Being cut and packed.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Sent to the customer.
    #[serde(rename = "Dispatched")]
    Dispatched,
}

impl RequestStatus {
    /// Stored representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Outstanding => "Outstanding",
            Self::InProgress => "In Progress",
            Self::Dispatched => "Dispatched",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status: {value}")]
pub struct UnknownStatusError {
    /// The rejected input.
    pub value: String,
}

impl FromStr for RequestStatus {
    type Err = UnknownStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "outstanding" => Ok(Self::Outstanding),
            "in progress" | "in_progress" => Ok(Self::InProgress),
            "dispatched" => Ok(Self::Dispatched),
            _ => Err(UnknownStatusError {
                value: value.to_owned(),
            }),
        }
    }
}

/// Fields shared by active and archived requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    /// Contact name.
    pub customer_name: String,
    /// Customer company, if given.
    #[serde(default)]
    pub company_name: Option<String>,
    /// One or more comma-separated addresses.
    pub email: String,
    /// Contact phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Customer reference for the order.
    #[serde(default)]
    pub reference: Option<String>,
    /// Delivery street.
    pub street_address: String,
    /// Delivery city.
    pub city: String,
    /// Delivery state or province.
    pub state_province: String,
    /// Delivery postal code.
    pub postal_code: String,
    /// Delivery country.
    pub country: String,
    /// Requested cutting descriptions.
    #[serde(with = "serde_compat::fabric_selections")]
    pub fabric_selections: Vec<String>,
    /// Free-text notes.
    #[serde(default)]
    pub additional_notes: Option<String>,
    /// Workflow status.
    pub status: RequestStatus,
    /// When the customer submitted the request.
    #[serde(with = "serde_compat::timestamp")]
    pub date_submitted: DateTime<Utc>,
    /// Set exactly when the status is Dispatched.
    #[serde(default, with = "serde_compat::optional_timestamp")]
    pub date_dispatched: Option<DateTime<Utc>>,
    /// Whether the supplier was emailed.
    #[serde(default, alias = "iliv_email_sent")]
    pub supplier_notified: bool,
    /// When the supplier was emailed.
    #[serde(
        default,
        alias = "iliv_email_sent_date",
        with = "serde_compat::optional_timestamp"
    )]
    pub supplier_notified_at: Option<DateTime<Utc>>,
}

impl RequestDetails {
    /// Individual addresses from the comma-separated `email` field.
    #[must_use]
    pub fn email_recipients(&self) -> Vec<&str> {
        self.email
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .collect()
    }

    /// Whether the dispatch timestamp agrees with the status.
    #[must_use]
    pub fn dispatch_date_consistent(&self) -> bool {
        (self.status == RequestStatus::Dispatched) == self.date_dispatched.is_some()
    }

    /// Names of required fields that are blank.
    #[must_use]
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        [
            ("customer_name", self.customer_name.as_str()),
            ("email", self.email.as_str()),
            ("street_address", self.street_address.as_str()),
            ("city", self.city.as_str()),
            ("state_province", self.state_province.as_str()),
            ("postal_code", self.postal_code.as_str()),
            ("country", self.country.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// Apply a status change, keeping `date_dispatched` set exactly when
    /// the request is dispatched.
    pub fn apply_status(&mut self, status: RequestStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            RequestStatus::Dispatched => {
                if self.date_dispatched.is_none() {
                    self.date_dispatched = Some(now);
                }
            }
            RequestStatus::Outstanding | RequestStatus::InProgress => {
                self.date_dispatched = None;
            }
        }
    }
}

/// A request in the active table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRequest {
    /// Database-assigned id.
    pub id: RequestId,
    /// Request contents.
    #[serde(flatten)]
    pub details: RequestDetails,
}

impl SampleRequest {
    /// Whether the request may move to the archive table at `cutoff`.
    ///
    /// Only dispatched requests whose dispatch date is strictly before the
    /// cutoff qualify.
    #[must_use]
    pub fn is_archivable(&self, cutoff: DateTime<Utc>) -> bool {
        self.details.status == RequestStatus::Dispatched
            && self
                .details
                .date_dispatched
                .is_some_and(|dispatched| dispatched < cutoff)
    }
}

/// A request in the archive table. Rows are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedRequest {
    /// Archive row identifier; distinct from the logical request id.
    #[serde(default)]
    pub id: i64,
    /// Id the request had in the active table.
    pub original_id: RequestId,
    /// When the row was archived.
    #[serde(with = "serde_compat::timestamp")]
    pub date_archived: DateTime<Utc>,
    /// Request contents, always dispatched.
    #[serde(flatten)]
    pub details: RequestDetails,
}

/// Archive row built from an active request, ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArchivedRequest {
    /// Id of the active request being archived.
    pub original_id: RequestId,
    /// Archive timestamp.
    pub date_archived: DateTime<Utc>,
    /// Copied request contents.
    pub details: RequestDetails,
}

/// Reasons an active request cannot be turned into an archive row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveEligibilityError {
    /// Archived rows must be dispatched.
    #[error("request {id} is {status}, only dispatched requests can be archived")]
    NotDispatched {
        /// Offending request.
        id: RequestId,
        /// Its current status.
        status: RequestStatus,
    },
    /// Archived rows must carry a dispatch date.
    #[error("request {id} is dispatched but has no dispatch date")]
    MissingDispatchDate {
        /// Offending request.
        id: RequestId,
    },
}

impl NewArchivedRequest {
    /// Copy an active request into an archive row stamped at `archived_at`.
    ///
    /// # Errors
    ///
    /// Fails when the request is not dispatched or lacks a dispatch date.
    pub fn from_active(
        request: &SampleRequest,
        archived_at: DateTime<Utc>,
    ) -> Result<Self, ArchiveEligibilityError> {
        if request.details.status != RequestStatus::Dispatched {
            return Err(ArchiveEligibilityError::NotDispatched {
                id: request.id,
                status: request.details.status,
            });
        }
        if request.details.date_dispatched.is_none() {
            return Err(ArchiveEligibilityError::MissingDispatchDate { id: request.id });
        }
        Ok(Self {
            original_id: request.id,
            date_archived: archived_at,
            details: request.details.clone(),
        })
    }
}

/// Validation errors for customer submissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestValidationError {
    /// A required field was blank.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Name of the blank field.
        field: &'static str,
    },
    /// An address in the email list is malformed.
    #[error("invalid email address: {value}")]
    InvalidEmail {
        /// The rejected address.
        value: String,
    },
    /// No fabrics were requested.
    #[error("at least one fabric selection is required")]
    NoFabricSelections,
}

/// Customer submission before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDraft {
    /// Contact name.
    pub customer_name: String,
    /// Customer company, if given.
    pub company_name: Option<String>,
    /// Comma-separated email addresses.
    pub email: String,
    /// Contact phone number.
    pub phone: Option<String>,
    /// Customer reference for the order.
    pub reference: Option<String>,
    /// Delivery street.
    pub street_address: String,
    /// Delivery city.
    pub city: String,
    /// Delivery state or province.
    pub state_province: String,
    /// Delivery postal code.
    pub postal_code: String,
    /// Delivery country.
    pub country: String,
    /// Requested cutting descriptions.
    pub fabric_selections: Vec<String>,
    /// Free-text notes.
    pub additional_notes: Option<String>,
}

impl RequestDraft {
    /// Validate the draft and stamp it as an outstanding request.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn into_details(
        self,
        submitted_at: DateTime<Utc>,
    ) -> Result<RequestDetails, RequestValidationError> {
        let details = RequestDetails {
            customer_name: self.customer_name.trim().to_owned(),
            company_name: non_blank(self.company_name),
            email: self.email.trim().to_owned(),
            phone: non_blank(self.phone),
            reference: non_blank(self.reference),
            street_address: self.street_address.trim().to_owned(),
            city: self.city.trim().to_owned(),
            state_province: self.state_province.trim().to_owned(),
            postal_code: self.postal_code.trim().to_owned(),
            country: self.country.trim().to_owned(),
            fabric_selections: self
                .fabric_selections
                .into_iter()
                .map(|selection| selection.trim().to_owned())
                .filter(|selection| !selection.is_empty())
                .collect(),
            additional_notes: non_blank(self.additional_notes),
            status: RequestStatus::Outstanding,
            date_submitted: submitted_at,
            date_dispatched: None,
            supplier_notified: false,
            supplier_notified_at: None,
        };

        if let Some(field) = details.missing_required_fields().first().copied() {
            return Err(RequestValidationError::EmptyField { field });
        }
        if let Some(bad) = details
            .email_recipients()
            .into_iter()
            .find(|address| !looks_like_email(address))
        {
            return Err(RequestValidationError::InvalidEmail {
                value: bad.to_owned(),
            });
        }
        if details.fabric_selections.is_empty() {
            return Err(RequestValidationError::NoFabricSelections);
        }
        Ok(details)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_owned())
        .filter(|inner| !inner.is_empty())
}

fn looks_like_email(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}
