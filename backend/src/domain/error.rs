//! Domain-level error types for the retention services.
//!
//! Port failures are wrapped rather than flattened so callers can still tell
//! a store outage from a snapshot write failure. The two rejected-mutation
//! conditions are separate variants: one guards the active table, the other
//! the archive table.

use crate::domain::ports::{JournalError, RequestStoreError, SnapshotRepositoryError};
use crate::domain::request::{RequestId, RequestValidationError};

/// Errors returned by retention operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetentionError {
    /// The request store failed.
    #[error(transparent)]
    Store(#[from] RequestStoreError),
    /// Snapshot storage failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotRepositoryError),
    /// A journal could not be read or written.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Submitted data failed validation.
    #[error(transparent)]
    Validation(#[from] RequestValidationError),
    /// No request exists with the given id.
    #[error("request {id} not found")]
    NotFound {
        /// Requested id.
        id: RequestId,
    },
    /// An active request was deleted outside the archive workflow.
    #[error("request {id} may only leave the active table by being archived")]
    UnauthorizedDeletion {
        /// Request that was targeted.
        id: RequestId,
    },
    /// An archived request was targeted for deletion or modification.
    #[error("archived request {id} is immutable")]
    ArchivedRecordImmutable {
        /// Original id of the archived request.
        id: RequestId,
    },
    /// A snapshot could not be built or encoded.
    #[error("snapshot encoding failed: {message}")]
    Encoding {
        /// Encoder error.
        message: String,
    },
}

impl RetentionError {
    /// Build an [`RetentionError::Encoding`] from any displayable cause.
    #[must_use]
    pub fn encoding(cause: impl std::fmt::Display) -> Self {
        Self::Encoding {
            message: cause.to_string(),
        }
    }
}
