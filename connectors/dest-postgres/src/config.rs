//! Pool construction for the reporting database.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use regsync_types::error::ConnectionError;
use tokio_postgres::NoTls;

/// Pool sizing and per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: usize,
    /// Applied to every pooled session as `statement_timeout`.
    pub statement_timeout: Duration,
    /// Bounds both connection establishment and pool checkout.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            statement_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Parse `connection` and attach the session options from `settings`.
///
/// # Errors
///
/// Returns [`ConnectionError`] when the connection string does not parse.
pub fn client_config(
    connection: &str,
    settings: &PoolSettings,
) -> Result<tokio_postgres::Config, ConnectionError> {
    let mut pg: tokio_postgres::Config = connection
        .parse()
        .map_err(|e| ConnectionError::destination(format!("invalid connection string: {e}")))?;

    let timeout = format!(
        "-c statement_timeout={}",
        settings.statement_timeout.as_millis()
    );
    let options = match pg.get_options() {
        Some(existing) if !existing.is_empty() => format!("{existing} {timeout}"),
        _ => timeout,
    };
    pg.options(&options);
    if pg.get_application_name().is_none() {
        pg.application_name("regsync");
    }
    pg.connect_timeout(settings.connect_timeout);
    Ok(pg)
}

/// Build the connection pool. No connection is opened until first use.
///
/// # Errors
///
/// Returns [`ConnectionError`] when the connection string is invalid or
/// the pool cannot be created.
pub fn build_pool(connection: &str, settings: &PoolSettings) -> Result<Pool, ConnectionError> {
    let pg = client_config(connection, settings)?;
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(settings.max_size)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(settings.connect_timeout))
        .create_timeout(Some(settings.connect_timeout))
        .build()
        .map_err(|e| ConnectionError::destination(format!("pool creation failed: {e}")))
}
