//! Builds concrete stores, sources and the destination from a [`SyncConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dest_postgres::{PoolSettings, PostgresDestination};
use regsync_engine::config::{
    parse_config, validate_config, DestinationConfig, EndpointConfig, SourceKind,
    StateBackendKind, SyncConfig,
};
use regsync_state::{CursorStore, PostgresCursorStore, SqliteCursorStore};
use regsync_types::connector::SourceDriver;
use source_db2::{Db2Config, Db2Source};
use source_postgres::PostgresSource;

const DESTINATION_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse and validate the config file.
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    let config = parse_config(path)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Open the configured cursor store. Both backends block, so the open runs
/// on the blocking pool.
pub async fn open_store(config: &SyncConfig) -> Result<Arc<dyn CursorStore>> {
    let backend = config.state.backend;
    let path = config.state.path.clone();
    let connection = config
        .state
        .connection
        .clone()
        .unwrap_or_else(|| config.destination.connection.clone());

    tokio::task::spawn_blocking(move || -> Result<Arc<dyn CursorStore>> {
        match backend {
            StateBackendKind::Sqlite => {
                let path = path.context("state.path is required for the sqlite backend")?;
                let store = SqliteCursorStore::open(&path).with_context(|| {
                    format!("Failed to open cursor store at {}", path.display())
                })?;
                Ok(Arc::new(store))
            }
            StateBackendKind::Postgres => {
                let store = PostgresCursorStore::open(&connection)
                    .context("Failed to open Postgres cursor store")?;
                Ok(Arc::new(store))
            }
        }
    })
    .await
    .context("Cursor store open task panicked")?
}

/// Release the store on the blocking pool; the Postgres backend must not be
/// dropped on a runtime thread.
pub async fn close_store(store: Arc<dyn CursorStore>) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop(store)).await {
        tracing::warn!("Cursor store close task panicked: {e}");
    }
}

/// Build the pooled reporting-database destination.
pub fn build_destination(config: &DestinationConfig) -> Result<Arc<PostgresDestination>> {
    let settings = PoolSettings {
        max_size: config.max_pool_size,
        statement_timeout: config.statement_timeout(),
        connect_timeout: DESTINATION_CONNECT_TIMEOUT,
    };
    let dest = PostgresDestination::new(&config.connection, &settings)
        .context("Invalid destination connection")?;
    Ok(Arc::new(dest))
}

/// Source driver for one endpoint. Nothing connects until the endpoint
/// loop starts.
pub fn build_source(endpoint: &EndpointConfig) -> Result<Box<dyn SourceDriver>> {
    let src = &endpoint.source;
    let driver: Box<dyn SourceDriver> = match src.kind {
        SourceKind::Db2 => Box::new(Db2Source::new(Db2Config {
            host: src.host.clone(),
            port: src.port(),
            database: src.database.clone(),
            user: src.user.clone(),
            password: src.password.clone(),
        })),
        SourceKind::Postgres => Box::new(PostgresSource::new(&source_postgres::Config {
            host: src.host.clone(),
            port: src.port(),
            user: src.user.clone(),
            password: src.password.clone(),
            database: src.database.clone(),
        })),
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsync_types::connector::Dialect;
    use regsync_types::state::{EndpointId, TableName};

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("sync.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn sqlite_config(state_path: &Path) -> String {
        format!(
            r#"
version: "1.0"
destination:
  connection: "host=localhost dbname=reporting"
state:
  backend: sqlite
  path: "{}"
endpoints:
  - id: mcb
    source:
      kind: db2
      host: cbs.bank.local
      database: CBSPROD
      user: reader
      password: secret
    tables: [ASSET_OWNED, LOANS]
  - id: branch_pg
    source:
      kind: postgres
      host: pg.bank.local
      database: core
      user: reader
      schema: public
    tables: [LOANS]
"#,
            state_path.display()
        )
    }

    #[test]
    fn test_load_config_and_build_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &sqlite_config(&dir.path().join("state.db")));
        let config = load_config(&path).unwrap();
        assert_eq!(config.endpoints.len(), 2);

        let db2 = build_source(&config.endpoints[0]).unwrap();
        assert_eq!(db2.dialect(), Dialect::Db2);
        assert!(!db2.is_connected());
        let pg = build_source(&config.endpoints[1]).unwrap();
        assert_eq!(pg.dialect(), Dialect::Postgres);
    }

    #[test]
    fn test_load_config_reports_path() {
        let err = load_config(Path::new("/nonexistent/sync.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/sync.yaml"), "{err:#}");
    }

    #[tokio::test]
    async fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &sqlite_config(&dir.path().join("state.db")));
        let config = load_config(&path).unwrap();

        let store = open_store(&config).await.unwrap();
        let cursor = store
            .get_cursor(&EndpointId::new("mcb"), &TableName::new("LOANS"))
            .unwrap();
        assert!(cursor.is_none());
        close_store(store).await;
        assert!(dir.path().join("state.db").exists());
    }

    #[tokio::test]
    async fn test_sqlite_backend_requires_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &sqlite_config(&dir.path().join("state.db")));
        let mut config = load_config(&path).unwrap();
        config.state.path = None;
        let err = open_store(&config).await.err().unwrap();
        assert!(err.to_string().contains("state.path"), "{err}");
    }

    #[tokio::test]
    async fn test_destination_pool_is_lazy() {
        let dest = DestinationConfig {
            connection: "host=127.0.0.1 port=1 dbname=reporting".into(),
            max_pool_size: 3,
            statement_timeout_secs: 5,
            insert_batch_size: 100,
            probe_timeout_ms: 500,
        };
        assert!(build_destination(&dest).is_ok());
    }
}
