//! [`Destination`] implementation over a `deadpool-postgres` pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use regsync_types::connector::{Destination, ProcessingLogEntry};
use regsync_types::error::{ConnectionError, LoadError};
use regsync_types::record::CanonicalRecord;
use regsync_types::schema::DestinationTable;
use regsync_types::state::EndpointId;
use tokio_postgres::types::ToSql;

use crate::config::{build_pool, PoolSettings};
use crate::ddl::{create_table_statements, DDL_LOCK, PROCESSING_LOG_DDL, PROCESSING_LOG_TABLE};
use crate::error::{format_pg_error, pool_error, statement_error};
use crate::insert::{build_params, upsert_sql, SqlParam, MAX_PARAMS};

/// Shared reporting-database destination.
pub struct PostgresDestination {
    pool: Pool,
    statement_timeout: Duration,
}

impl PostgresDestination {
    /// Create the pool. Connections open lazily.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the connection string is invalid.
    pub fn new(connection: &str, settings: &PoolSettings) -> Result<Self, ConnectionError> {
        Ok(Self {
            pool: build_pool(connection, settings)?,
            statement_timeout: settings.statement_timeout,
        })
    }

    async fn client(&self) -> Result<Object, LoadError> {
        self.pool.get().await.map_err(|e| pool_error(&e))
    }

    async fn run_ddl(&self, client: &Object, tables: &[DestinationTable]) -> Result<(), LoadError> {
        client
            .batch_execute(PROCESSING_LOG_DDL)
            .await
            .map_err(|e| statement_error(PROCESSING_LOG_TABLE, &e, self.statement_timeout))?;
        for table in tables {
            for stmt in create_table_statements(table) {
                tracing::debug!(table = table.name.as_str(), "Ensuring table: {stmt}");
                client
                    .batch_execute(&stmt)
                    .await
                    .map_err(|e| statement_error(&table.name, &e, self.statement_timeout))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for PostgresDestination {
    async fn probe(&self) -> Result<(), ConnectionError> {
        let client = self.pool.get().await.map_err(|e| {
            ConnectionError::destination(format!("pool checkout failed: {e}"))
        })?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| ConnectionError::destination(format_pg_error(&e)))?;
        Ok(())
    }

    async fn prepare(&self, tables: &[DestinationTable]) -> Result<(), LoadError> {
        let client = self.client().await?;
        client
            .query_one("SELECT pg_advisory_lock(hashtext($1)::bigint)", &[&DDL_LOCK])
            .await
            .map_err(|e| statement_error("advisory lock", &e, self.statement_timeout))?;

        let result = self.run_ddl(&client, tables).await;

        if let Err(e) = client
            .query_one("SELECT pg_advisory_unlock(hashtext($1)::bigint)", &[&DDL_LOCK])
            .await
        {
            tracing::warn!(error = %format_pg_error(&e), "Failed to release DDL advisory lock");
        }
        result?;
        tracing::info!(tables = tables.len(), "Destination tables ready");
        Ok(())
    }

    async fn upsert_batch(
        &self,
        endpoint: &EndpointId,
        table: &DestinationTable,
        records: &[CanonicalRecord],
    ) -> Result<u64, LoadError> {
        if records.is_empty() {
            return Ok(0);
        }
        let params = build_params(endpoint.as_str(), table, records)
            .map_err(|msg| LoadError::rejected(&table.name, msg))?;
        if params.len() > MAX_PARAMS {
            return Err(LoadError::rejected(
                &table.name,
                format!("{} parameters exceed the protocol limit", params.len()),
            ));
        }
        let sql = upsert_sql(table, records.len());
        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_tosql).collect();

        let client = self.client().await?;
        let stmt = client
            .prepare_cached(&sql)
            .await
            .map_err(|e| statement_error(&table.name, &e, self.statement_timeout))?;
        let written = client
            .execute(&stmt, &param_refs)
            .await
            .map_err(|e| statement_error(&table.name, &e, self.statement_timeout))?;

        tracing::debug!(
            endpoint = endpoint.as_str(),
            table = table.name.as_str(),
            rows = written,
            "Upserted batch"
        );
        Ok(written)
    }

    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<(), LoadError> {
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO bot_processing_log \
                 (endpoint_id, table_name, records_processed, records_failed, \
                  processing_time_ms, error_message) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &entry.endpoint_id.as_str(),
                    &entry.table_name.as_str(),
                    &as_i64(entry.records_processed),
                    &as_i64(entry.records_failed),
                    &as_i64(entry.processing_time_ms),
                    &entry.error_message,
                ],
            )
            .await
            .map_err(|e| statement_error(PROCESSING_LOG_TABLE, &e, self.statement_timeout))?;
        Ok(())
    }
}
