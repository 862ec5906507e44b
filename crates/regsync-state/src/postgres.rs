//! `PostgreSQL`-backed implementation of [`CursorStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>`. The
//! client is re-established on the next call after the server drops it,
//! so a reporting-database restart does not wedge cursor reads.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use postgres::{Client, NoTls};
use regsync_types::state::{CursorState, EndpointId, TableName};

use crate::backend::CursorStore;
use crate::error;
use crate::error::StateError;

/// Idempotent DDL for the cursor table (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS bot_polling_timestamps (
    endpoint_id VARCHAR(100) NOT NULL,
    table_name VARCHAR(100) NOT NULL,
    cursor_field TEXT,
    cursor_value TEXT,
    updated_at TEXT NOT NULL DEFAULT (now()::text),
    PRIMARY KEY (endpoint_id, table_name)
);
";

/// `PostgreSQL`-backed cursor storage.
///
/// Create with [`PostgresCursorStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=bot_db user=postgres"`).
pub struct PostgresCursorStore {
    connstr: String,
    client: Mutex<Client>,
}

impl PostgresCursorStore {
    /// Connect to a `PostgreSQL` database and initialize the cursor table.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Bootstrap`] if the server is unreachable or the
    /// cursor table cannot be created.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let client = Self::connect(connstr)?;
        Ok(Self {
            connstr: connstr.to_string(),
            client: Mutex::new(client),
        })
    }

    fn connect(connstr: &str) -> error::Result<Client> {
        let mut client = Client::connect(connstr, NoTls).map_err(StateError::Bootstrap)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(StateError::Bootstrap)?;
        Ok(client)
    }

    /// Acquire the client lock, reconnecting if the previous session closed.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        let mut guard = self.client.lock().map_err(|_| StateError::LockPoisoned)?;
        if guard.is_closed() {
            *guard = Self::connect(&self.connstr)?;
        }
        Ok(guard)
    }

    /// Current UTC time as ISO-8601 string.
    fn now_iso() -> String {
        Utc::now().to_rfc3339()
    }
}

impl CursorStore for PostgresCursorStore {
    fn get_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
    ) -> error::Result<Option<CursorState>> {
        let mut client = self.lock_client()?;
        let rows = client.query(
            "SELECT cursor_field, cursor_value, updated_at \
             FROM bot_polling_timestamps WHERE endpoint_id = $1 AND table_name = $2",
            &[&endpoint.as_str(), &table.as_str()],
        )?;

        Ok(rows.first().map(|row| CursorState {
            cursor_field: row.get(0),
            cursor_value: row.get(1),
            updated_at: row.get(2),
        }))
    }

    fn set_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let mut client = self.lock_client()?;
        client.execute(
            "INSERT INTO bot_polling_timestamps \
             (endpoint_id, table_name, cursor_field, cursor_value, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (endpoint_id, table_name) \
             DO UPDATE SET cursor_field = $3, cursor_value = $4, updated_at = $5",
            &[
                &endpoint.as_str(),
                &table.as_str(),
                &cursor.cursor_field,
                &cursor.cursor_value,
                &cursor.updated_at,
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
        let mut client = self.lock_client()?;
        let now = Self::now_iso();

        let rows_affected = match expected {
            Some(expected_val) => client.execute(
                "UPDATE bot_polling_timestamps \
                 SET cursor_field = $1, cursor_value = $2, updated_at = $3 \
                 WHERE endpoint_id = $4 AND table_name = $5 AND cursor_value = $6",
                &[
                    &cursor_field,
                    &new_value,
                    &now,
                    &endpoint.as_str(),
                    &table.as_str(),
                    &expected_val,
                ],
            )?,
            None => client.execute(
                "INSERT INTO bot_polling_timestamps \
                 (endpoint_id, table_name, cursor_field, cursor_value, updated_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
                &[
                    &endpoint.as_str(),
                    &table.as_str(),
                    &cursor_field,
                    &new_value,
                    &now,
                ],
            )?,
        };

        Ok(rows_affected > 0)
    }

    fn list_cursors(&self, endpoint: &EndpointId) -> error::Result<Vec<(TableName, CursorState)>> {
        let mut client = self.lock_client()?;
        let rows = client.query(
            "SELECT table_name, cursor_field, cursor_value, updated_at \
             FROM bot_polling_timestamps WHERE endpoint_id = $1 ORDER BY table_name",
            &[&endpoint.as_str()],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let table: String = row.get(0);
                (
                    TableName::new(table),
                    CursorState {
                        cursor_field: row.get(1),
                        cursor_value: row.get(2),
                        updated_at: row.get(3),
                    },
                )
            })
            .collect())
    }
}
