//! Data-retention safeguards for the fabric sample request tracker.
//!
//! Requests live in an active table until they have been dispatched for long
//! enough, then move to an immutable archive. Around that lifecycle this
//! crate keeps a checksummed audit trail, checks both tables for integrity
//! violations, takes snapshots before any state-changing work and can
//! rebuild lost records from the audit trail or a snapshot.
//!
//! - [`domain`] holds the record types, services and ports.
//! - [`outbound`] holds the PostgreSQL store and the file-backed journals
//!   and snapshot repository.
//! - [`config`] loads [`config::RetentionSettings`].

pub mod config;
pub mod domain;
pub mod outbound;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
