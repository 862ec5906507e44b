//! `SQLite`-backed implementation of [`CursorStore`].
//!
//! For single-host deployments and tests. File-backed stores run in WAL
//! mode so `regsync cursors` can read while `regsync run` is writing.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use regsync_types::state::{CursorState, EndpointId, TableName};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::CursorStore;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Wait this long for a writer in another process before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idempotent DDL for the cursor table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS bot_polling_timestamps (
    endpoint_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    cursor_field TEXT,
    cursor_value TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (endpoint_id, table_name)
);
";

/// `SQLite`-backed cursor storage.
///
/// Create with [`SqliteCursorStore::open`] for file-backed persistence
/// or [`SqliteCursorStore::in_memory`] for tests.
pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

impl SqliteCursorStore {
    /// Open or create the cursor database at `path`, creating missing
    /// parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::bootstrap(conn)
    }

    /// In-memory store; cursors vanish with the value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the schema can't be created.
    pub fn in_memory() -> error::Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| iso.to_string(),
            |dt| dt.format(SQLITE_DATETIME_FMT).to_string(),
        )
    }
}

impl CursorStore for SqliteCursorStore {
    fn get_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
    ) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT cursor_field, cursor_value, updated_at \
                 FROM bot_polling_timestamps WHERE endpoint_id = ?1 AND table_name = ?2",
                rusqlite::params![endpoint.as_str(), table.as_str()],
                |row| {
                    let cursor_field: Option<String> = row.get(0)?;
                    let cursor_value: Option<String> = row.get(1)?;
                    let updated_at: String = row.get(2)?;
                    Ok((cursor_field, cursor_value, updated_at))
                },
            )
            .optional()?;

        Ok(row.map(|(cursor_field, cursor_value, updated_at)| CursorState {
            cursor_field,
            cursor_value,
            updated_at: Self::sqlite_to_iso8601(&updated_at),
        }))
    }

    fn set_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&cursor.updated_at);
        conn.execute(
            "INSERT INTO bot_polling_timestamps \
             (endpoint_id, table_name, cursor_field, cursor_value, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(endpoint_id, table_name) \
             DO UPDATE SET cursor_field = ?3, cursor_value = ?4, updated_at = ?5",
            rusqlite::params![
                endpoint.as_str(),
                table.as_str(),
                cursor.cursor_field,
                cursor.cursor_value,
                updated_at,
            ],
        )?;
        Ok(())
    }

    fn compare_and_set(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        cursor_field: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();

        let rows_affected = match expected {
            Some(expected_val) => conn.execute(
                "UPDATE bot_polling_timestamps \
                 SET cursor_field = ?1, cursor_value = ?2, updated_at = ?3 \
                 WHERE endpoint_id = ?4 AND table_name = ?5 AND cursor_value = ?6",
                rusqlite::params![
                    cursor_field,
                    new_value,
                    now,
                    endpoint.as_str(),
                    table.as_str(),
                    expected_val
                ],
            )?,
            None => conn.execute(
                "INSERT OR IGNORE INTO bot_polling_timestamps \
                 (endpoint_id, table_name, cursor_field, cursor_value, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![endpoint.as_str(), table.as_str(), cursor_field, new_value, now],
            )?,
        };

        Ok(rows_affected > 0)
    }

    fn list_cursors(&self, endpoint: &EndpointId) -> error::Result<Vec<(TableName, CursorState)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT table_name, cursor_field, cursor_value, updated_at \
             FROM bot_polling_timestamps WHERE endpoint_id = ?1 ORDER BY table_name",
        )?;
        let rows = stmt.query_map(rusqlite::params![endpoint.as_str()], |row| {
            Ok((
                TableName::new(row.get::<_, String>(0)?),
                CursorState {
                    cursor_field: row.get(1)?,
                    cursor_value: row.get(2)?,
                    updated_at: Self::sqlite_to_iso8601(&row.get::<_, String>(3)?),
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
