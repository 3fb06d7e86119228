//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly. They are used
//! by Diesel for compile-time query validation and type-safe SQL generation.
//!
//! # Maintenance
//!
//! When migrations change the schema, this file should be regenerated or
//! manually updated to reflect those changes. The `diesel print-schema`
//! command can generate these definitions from a live database.

diesel::table! {
    /// Active sample requests.
    ///
    /// `date_dispatched` is set exactly when `status` is `Dispatched`.
    sample_requests (id) {
        id -> Int8,
        customer_name -> Varchar,
        company_name -> Nullable<Varchar>,
        /// One or more comma-separated addresses.
        email -> Varchar,
        phone -> Nullable<Varchar>,
        reference -> Nullable<Varchar>,
        street_address -> Varchar,
        city -> Varchar,
        state_province -> Varchar,
        postal_code -> Varchar,
        country -> Varchar,
        /// JSON array of fabric names.
        fabric_selections -> Jsonb,
        additional_notes -> Nullable<Text>,
        status -> Varchar,
        date_submitted -> Timestamptz,
        date_dispatched -> Nullable<Timestamptz>,
        supplier_notified -> Bool,
        supplier_notified_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Immutable copies of dispatched requests moved out of the active table.
    ///
    /// `original_id` is unique: a request is archived at most once.
    archived_requests (id) {
        id -> Int8,
        original_id -> Int8,
        customer_name -> Varchar,
        company_name -> Nullable<Varchar>,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        reference -> Nullable<Varchar>,
        street_address -> Varchar,
        city -> Varchar,
        state_province -> Varchar,
        postal_code -> Varchar,
        country -> Varchar,
        fabric_selections -> Jsonb,
        additional_notes -> Nullable<Text>,
        status -> Varchar,
        date_submitted -> Timestamptz,
        date_dispatched -> Timestamptz,
        date_archived -> Timestamptz,
        supplier_notified -> Bool,
        supplier_notified_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sample_requests, archived_requests);
