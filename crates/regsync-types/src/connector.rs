//! Contracts implemented by source and destination connectors.
//!
//! Source drivers are blocking and are always driven from a dedicated
//! blocking thread by the engine. Destinations are async and shared across
//! endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::{CursorKind, CursorValue};
use crate::error::{ConnectionError, FetchError, LoadError};
use crate::record::{CanonicalRecord, RowEvent};
use crate::schema::DestinationTable;
use crate::state::{EndpointId, TableName};

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// SQL dialect of a source driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// IBM DB2: `?` placeholders, `FETCH FIRST n ROWS ONLY`.
    Db2,
    /// `PostgreSQL`: `$1` placeholders, `FETCH FIRST n ROWS ONLY`.
    Postgres,
}

impl Dialect {
    /// Cursor placeholder. DB2 receives every parameter as text, so a
    /// timestamp cursor is cast explicitly and the predicate compares
    /// chronologically against a `TIMESTAMP` column.
    fn placeholder(self, kind: CursorKind) -> &'static str {
        match (self, kind) {
            (Self::Db2, CursorKind::Timestamp) => "CAST(? AS TIMESTAMP)",
            (Self::Db2, _) => "?",
            (Self::Postgres, _) => "$1",
        }
    }

    /// Lightweight liveness query.
    #[must_use]
    pub fn probe_sql(self) -> &'static str {
        match self {
            Self::Db2 => "SELECT 1 FROM SYSIBM.SYSDUMMY1",
            Self::Postgres => "SELECT 1",
        }
    }
}

/// One incremental fetch: rows of `table` strictly after `cursor`, in
/// ordering-column order, at most `limit` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub table: TableName,
    pub sql: String,
    /// Column `sql` filters and orders on, as written in `sql`.
    pub ordering_column: String,
    /// Bound to the single placeholder in `sql`.
    pub cursor: CursorValue,
    pub limit: u32,
}

impl SourceQuery {
    /// Render the incremental query for `dialect`.
    ///
    /// `projection` of `None` selects every column; identifiers are
    /// expected to be validated by the caller.
    #[must_use]
    pub fn build(
        dialect: Dialect,
        schema: &str,
        table: &TableName,
        projection: Option<&[&str]>,
        ordering_column: &str,
        cursor: &CursorValue,
        limit: u32,
    ) -> Self {
        let columns = projection.map_or_else(|| "*".to_string(), |cols| cols.join(", "));
        let sql = format!(
            "SELECT {columns} FROM {schema}.{table} WHERE {ordering_column} > {ph} \
             ORDER BY {ordering_column} FETCH FIRST {limit} ROWS ONLY",
            table = table.as_str(),
            ph = dialect.placeholder(cursor.kind()),
        );
        Self {
            table: table.clone(),
            sql,
            ordering_column: ordering_column.to_string(),
            cursor: cursor.clone(),
            limit,
        }
    }
}

/// Blocking driver for one source connection.
///
/// A driver that returns an error from [`fetch`](Self::fetch) must also
/// report `is_connected() == false` until the next successful
/// [`connect`](Self::connect) when the error was connection-level.
pub trait SourceDriver: Send {
    fn dialect(&self) -> Dialect;

    /// Open the connection, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the source is unreachable or
    /// rejects the credentials.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;

    /// Run the dialect's probe query; `false` on any failure.
    fn probe(&mut self) -> bool;

    /// Execute `query` and decode its result set.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Connection`] when the connection is gone and
    /// [`FetchError::Query`] when only the statement failed.
    fn fetch(&mut self, query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError>;

    /// Close the connection. Idempotent.
    fn disconnect(&mut self);
}

// ---------------------------------------------------------------------------
// Destination side
// ---------------------------------------------------------------------------

/// Audit row appended after each table load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub endpoint_id: EndpointId,
    pub table_name: TableName,
    pub records_processed: u64,
    pub records_failed: u64,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Reporting database the engine loads into.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Cheap liveness check (`SELECT 1`).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the destination is unreachable.
    async fn probe(&self) -> Result<(), ConnectionError>;

    /// Create destination tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when DDL execution fails.
    async fn prepare(&self, tables: &[DestinationTable]) -> Result<(), LoadError>;

    /// Upsert `records` as one statement, keyed by
    /// `(endpoint_id, natural key...)`. Returns the rows written.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Rejected`] when the statement fails as a whole
    /// and a connection-class [`LoadError`] when the session is unusable.
    async fn upsert_batch(
        &self,
        endpoint: &EndpointId,
        table: &DestinationTable,
        records: &[CanonicalRecord],
    ) -> Result<u64, LoadError>;

    /// Append one audit row.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the insert fails.
    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<(), LoadError>;
}
