//! Error taxonomy shared by the engine and connectors.
//!
//! Each error is caught at the narrowest boundary that can act on it:
//! connection errors drive reconnects, fetch errors skip a table for one
//! cycle, transform errors drop a row, load errors fall back to per-row
//! inserts.

use std::fmt;
use std::time::Duration;

use crate::cursor::CursorKind;

/// Which side of the sync a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Destination => "destination",
        })
    }
}

/// A source or destination is unreachable, rejected credentials, or
/// dropped the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{side} connection error: {message}")]
pub struct ConnectionError {
    pub side: Side,
    pub message: String,
}

impl ConnectionError {
    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self {
            side: Side::Source,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn destination(message: impl Into<String>) -> Self {
        Self {
            side: Side::Destination,
            message: message.into(),
        }
    }
}

/// Query preparation or execution failed against the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The connection is gone; the cycle must reconnect.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The statement failed but the connection is still usable.
    #[error("query on {table} failed: {message}")]
    Query { table: String, message: String },
}

impl FetchError {
    #[must_use]
    pub fn query(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            table: table.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// A single row could not be turned into a canonical record.
///
/// Messages name the table, field and ordering value only, never the row
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Required field missing or empty.
    #[error("{table}: required field {field} is empty")]
    MissingField { table: String, field: String },

    /// Ordering column absent or not convertible to the table's cursor kind.
    #[error("{table}: ordering column {column} is not a valid {kind}")]
    BadOrdering {
        table: String,
        column: String,
        kind: CursorKind,
    },
}

impl TransformError {
    /// `true` for required-field validation failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingField { .. })
    }
}

/// Upsert failure reported by a destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The database rejected the statement (constraint, type, ...).
    #[error("{table}: {message}")]
    Rejected { table: String, message: String },

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    /// A non-empty input produced zero inserted rows.
    #[error("{table}: all {attempted} records rejected")]
    AllRejected { table: String, attempted: usize },
}

impl LoadError {
    #[must_use]
    pub fn rejected(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Errors after which the destination connection cannot be trusted.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Stored cursor text could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("invalid {kind} cursor value {raw:?}")]
    Decode { kind: CursorKind, raw: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_names_side() {
        let err = ConnectionError::source("refused");
        assert_eq!(err.to_string(), "source connection error: refused");
    }

    #[test]
    fn fetch_error_classification() {
        let err: FetchError = ConnectionError::source("gone").into();
        assert!(err.is_connection());
        assert!(!FetchError::query("T", "syntax").is_connection());
    }

    #[test]
    fn load_error_classification() {
        assert!(LoadError::Timeout(Duration::from_secs(30)).is_connection());
        assert!(LoadError::from(ConnectionError::destination("reset")).is_connection());
        assert!(!LoadError::rejected("t", "dup").is_connection());
    }

    #[test]
    fn transform_error_hides_payload() {
        let err = TransformError::MissingField {
            table: "PERSONAL_DATA_INDIVIDUALS".into(),
            field: "customer_identification_number".into(),
        };
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "PERSONAL_DATA_INDIVIDUALS: required field customer_identification_number is empty"
        );
    }
}
