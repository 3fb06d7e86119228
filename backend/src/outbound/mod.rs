//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits:
//!
//! - **persistence**: PostgreSQL request store using Diesel ORM
//! - **journal**: bounded JSON-lines audit, operations and alert logs
//! - **snapshots**: backup snapshot files
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod journal;
pub mod persistence;
pub mod snapshots;
