//! Sync configuration model deserialized from YAML.

use std::path::PathBuf;
use std::time::Duration;

use regsync_types::state::{EndpointId, TableName};
use serde::Deserialize;

pub const DEFAULT_FETCH_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_BASE_SECS: u64 = 5;
pub const DEFAULT_SOURCE_SCHEMA: &str = "CBS_SCHEMA";

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub version: String,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub endpoints: Vec<EndpointConfig>,
}

/// Reporting database connection and load tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// libpq-style connection string or `postgresql://` URI.
    pub connection: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl DestinationConfig {
    #[must_use]
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Postgres,
    Sqlite,
}

/// Where cursors are persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Postgres connection string; falls back to `destination.connection`.
    #[serde(default)]
    pub connection: Option<String>,
    /// `SQLite` database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Initial-connection retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_secs")]
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_secs: DEFAULT_RETRY_BASE_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Db2,
    Postgres,
}

/// Connection parameters of one core-banking source.
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl SourceConfig {
    /// Configured port, or the default for the source kind.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.kind {
            SourceKind::Db2 => 50000,
            SourceKind::Postgres => 5432,
        })
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

/// One source system and the tables polled from it.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub source: SourceConfig,
    pub tables: Vec<String>,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl EndpointConfig {
    #[must_use]
    pub fn endpoint_id(&self) -> EndpointId {
        EndpointId::new(self.id.clone())
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<TableName> {
        self.tables.iter().map(TableName::new).collect()
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

fn default_statement_timeout_secs() -> u64 {
    DEFAULT_STATEMENT_TIMEOUT_SECS
}

fn default_insert_batch_size() -> usize {
    DEFAULT_INSERT_BATCH_SIZE
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_secs() -> u64 {
    DEFAULT_RETRY_BASE_SECS
}

fn default_fetch_batch_size() -> u32 {
    DEFAULT_FETCH_BATCH_SIZE
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_schema() -> String {
    DEFAULT_SOURCE_SCHEMA.to_string()
}
