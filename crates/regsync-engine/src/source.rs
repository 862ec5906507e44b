//! Async facade over a blocking [`SourceDriver`].
//!
//! Every driver call is dispatched to the blocking pool as one unit of work
//! (connect, probe, fetch). The driver sits behind a mutex so a connector can
//! be cloned into spawned closures; one endpoint loop owns it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regsync_types::connector::{Dialect, SourceDriver, SourceQuery};
use regsync_types::error::{ConnectionError, FetchError};
use regsync_types::record::RowEvent;

/// One source connection of one endpoint.
#[derive(Clone)]
pub struct SourceConnector {
    driver: Arc<Mutex<Box<dyn SourceDriver>>>,
    dialect: Dialect,
}

fn lock_driver(
    driver: &Mutex<Box<dyn SourceDriver>>,
) -> Result<MutexGuard<'_, Box<dyn SourceDriver>>, ConnectionError> {
    driver
        .lock()
        .map_err(|_| ConnectionError::source("source driver lock poisoned"))
}

impl SourceConnector {
    #[must_use]
    pub fn new(driver: Box<dyn SourceDriver>) -> Self {
        let dialect = driver.dialect();
        Self {
            driver: Arc::new(Mutex::new(driver)),
            dialect,
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Open (or reopen) the source connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the driver cannot connect.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let driver = self.driver.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_driver(&driver)?;
            guard.connect()
        })
        .await
        .map_err(|e| ConnectionError::source(format!("connect task panicked: {e}")))?
    }

    /// Probe the connection; `false` when disconnected, failing, or slower
    /// than `timeout`.
    pub async fn test_connection(&self, timeout: Duration) -> bool {
        let driver = self.driver.clone();
        let probe = tokio::task::spawn_blocking(move || match lock_driver(&driver) {
            Ok(mut guard) => guard.is_connected() && guard.probe(),
            Err(_) => false,
        });
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(e)) => {
                tracing::warn!("Source probe task panicked: {e}");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis(), "Source probe timed out");
                false
            }
        }
    }

    /// Run one incremental query, connecting first if needed.
    ///
    /// A failed fetch closes the connection so the next use reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`]; see [`SourceDriver::fetch`].
    pub async fn fetch(&self, query: SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
        let driver = self.driver.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_driver(&driver)?;
            if !guard.is_connected() {
                guard.connect()?;
            }
            let result = guard.fetch(&query);
            if result.is_err() {
                guard.disconnect();
            }
            result
        })
        .await
        .map_err(|e| {
            FetchError::from(ConnectionError::source(format!("fetch task panicked: {e}")))
        })?
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) {
        let driver = self.driver.clone();
        let closed = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = lock_driver(&driver) {
                guard.disconnect();
            };
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!("Source disconnect task panicked: {e}");
        }
    }
}

impl std::fmt::Debug for SourceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConnector")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}
