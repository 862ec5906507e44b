//! Mapping of driver and pool errors onto [`LoadError`].

use std::time::Duration;

use regsync_types::error::{ConnectionError, LoadError};

/// Raised when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

pub(crate) fn format_pg_error(error: &tokio_postgres::Error) -> String {
    if let Some(db_error) = error.as_db_error() {
        let detail = db_error.detail().unwrap_or("n/a");
        format!(
            "{} (sqlstate={} detail={})",
            db_error.message(),
            db_error.code().code(),
            detail
        )
    } else {
        error.to_string()
    }
}

/// Classify a failed statement against `table`.
///
/// Closed sessions, I/O failures and SQLSTATE classes 08/57P0 are
/// connection-class; a cancelled statement is a timeout; anything else
/// the database said about the statement is a rejection.
pub(crate) fn statement_error(
    table: &str,
    error: &tokio_postgres::Error,
    statement_timeout: Duration,
) -> LoadError {
    if error.is_closed() || is_io(error) {
        return ConnectionError::destination(error.to_string()).into();
    }
    match error.code().map(tokio_postgres::error::SqlState::code) {
        Some(QUERY_CANCELED) => LoadError::Timeout(statement_timeout),
        Some(code) if code.starts_with("08") || code.starts_with("57P0") => {
            ConnectionError::destination(format_pg_error(error)).into()
        }
        _ => LoadError::rejected(table, format_pg_error(error)),
    }
}

pub(crate) fn pool_error(error: &deadpool_postgres::PoolError) -> LoadError {
    ConnectionError::destination(format!("pool checkout failed: {error}")).into()
}

fn is_io(error: &tokio_postgres::Error) -> bool {
    std::error::Error::source(error).is_some_and(|s| s.is::<std::io::Error>())
}
