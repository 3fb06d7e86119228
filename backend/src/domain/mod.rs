//! Retention domain: request records, their audit trail and the services
//! that archive, verify, back up and recover them.
//!
//! Purpose: keep every customer request in exactly one of the active or
//! archive tables, make every write reconstructible from the audit trail
//! and refuse state-changing work unless a snapshot exists first.
//!
//! Public surface:
//! - `RetentionError` (alias to `error::RetentionError`): domain failure.
//! - `RetentionServices` (alias to `services::RetentionServices`): the
//!   wired service set used by the admin binary and integration tests.

pub mod archiver;
pub mod audit;
pub mod business_validation;
pub mod error;
pub mod health;
pub mod integrity;
pub mod ledger;
pub mod monitor;
pub mod ports;
pub mod recovery;
pub mod request;
pub mod safeguards;
pub mod services;
pub mod snapshot;

pub use self::error::RetentionError;
pub use self::services::{RetentionOptions, RetentionPorts, RetentionServices};
