//! Diesel and pool error mapping for the request store.

use tracing::debug;

use crate::domain::ports::RequestStoreError;

use super::pool::PoolError;

/// Map pool errors to request store connection errors.
pub(crate) fn map_pool_error(error: PoolError) -> RequestStoreError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            RequestStoreError::connection(message)
        }
    }
}

/// Map Diesel errors to request store errors.
///
/// Unique violations become conflicts so callers can tell a second archive
/// copy apart from an outage.
pub(crate) fn map_diesel_error(error: diesel::result::Error) -> RequestStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => RequestStoreError::query("record not found"),
        DieselError::QueryBuilderError(_) => RequestStoreError::query("database query error"),
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            RequestStoreError::conflict(info.message())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            RequestStoreError::connection("database connection error")
        }
        DieselError::DatabaseError(_, info) => RequestStoreError::query(info.message()),
        other => RequestStoreError::query(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    //! Mapping coverage for the variants that matter to callers.
    use diesel::result::{DatabaseErrorKind, Error as DieselError};
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn pool_errors_are_connection_failures() {
        let mapped = map_pool_error(PoolError::Checkout {
            message: "timed out".to_owned(),
        });
        assert_eq!(mapped, RequestStoreError::connection("timed out"));
    }

    #[rstest]
    fn unique_violation_is_a_conflict() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_owned()),
        );
        assert!(matches!(
            map_diesel_error(error),
            RequestStoreError::Conflict { .. }
        ));
    }

    #[rstest]
    fn closed_connection_is_a_connection_failure() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            Box::new("server closed the connection".to_owned()),
        );
        assert_eq!(
            map_diesel_error(error),
            RequestStoreError::connection("database connection error")
        );
    }

    #[rstest]
    fn not_found_is_a_query_failure() {
        assert_eq!(
            map_diesel_error(DieselError::NotFound),
            RequestStoreError::query("record not found")
        );
    }
}
