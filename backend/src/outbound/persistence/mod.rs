//! PostgreSQL persistence for the active and archive request tables.
//!
//! The request store is implemented with Diesel ORM, `diesel-async` for
//! non-blocking queries and `bb8` for connection pooling.
//!
//! # Architecture
//!
//! - **Thin adapter**: the store only translates between Diesel rows and
//!   domain types. Retention rules live in the domain services.
//! - **Internal models**: Diesel row structs (`models.rs`) and schema
//!   definitions (`schema.rs`) are internal implementation details, never
//!   exposed to the domain layer.
//! - **Caller-owned transactions**: every port call runs inside a
//!   transaction the domain opened, with named savepoints for per-record
//!   isolation.
//! - **Strongly typed errors**: all database errors are mapped to
//!   `RequestStoreError`.
//!
//! # Example
//!
//! ```ignore
//! use sample_retention::outbound::persistence::{DbPool, DieselRequestStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/samples")).await?;
//! let store = DieselRequestStore::new(pool);
//! ```

mod diesel_basic_error_mapping;
mod diesel_request_store;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_request_store::DieselRequestStore;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, OwnedConnection, PoolConfig, PoolError};
