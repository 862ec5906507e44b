//! Runs one [`EndpointPoller`] per configured endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use regsync_state::CursorStore;
use regsync_types::connector::{Destination, SourceDriver};
use regsync_types::error::{ConnectionError, LoadError};
use regsync_types::state::EndpointId;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::{EndpointConfig, SyncConfig};
use crate::error::PollerError;
use crate::loader::BatchLoader;
use crate::metrics::MetricsRegistry;
use crate::orchestrator::{Control, EndpointPoller, EndpointSettings};
use crate::retry::{connect_with_retry, RetryPolicy};
use crate::source::SourceConnector;
use crate::tables::{destination_tables, TableHandler, TableRegistry};

const CONTROL_CAPACITY: usize = 4;

/// Builds the blocking source driver of one endpoint.
pub type SourceFactory =
    dyn Fn(&EndpointConfig) -> Result<Box<dyn SourceDriver>> + Send + Sync;

/// Cheap, cloneable admin handle.
#[derive(Clone)]
pub struct SupervisorHandle {
    controls: Arc<HashMap<EndpointId, mpsc::Sender<Control>>>,
    metrics: Arc<MetricsRegistry>,
}

impl SupervisorHandle {
    /// Ask `endpoint` to reconnect and poll now. Fire-and-forget: returns
    /// whether the endpoint is known, not whether the restart happened.
    #[must_use]
    pub fn restart_endpoint(&self, endpoint: &EndpointId) -> bool {
        let Some(tx) = self.controls.get(endpoint) else {
            return false;
        };
        if let Err(err) = tx.try_send(Control::Restart) {
            tracing::debug!(endpoint = endpoint.as_str(), "Restart not queued: {err}");
        }
        true
    }

    /// Ask every endpoint to stop after its in-flight cycle.
    pub async fn shutdown(&self) {
        for (endpoint, tx) in self.controls.iter() {
            if tx.send(Control::Shutdown).await.is_err() {
                tracing::debug!(endpoint = endpoint.as_str(), "Endpoint already stopped");
            }
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointId> {
        let mut ids: Vec<_> = self.controls.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Owner of the endpoint tasks.
pub struct Supervisor {
    tasks: JoinSet<(EndpointId, Result<(), PollerError>)>,
    handle: SupervisorHandle,
}

impl Supervisor {
    /// Create destination tables and spawn every endpoint loop.
    ///
    /// # Errors
    ///
    /// Fails when a source driver cannot be built or the destination DDL
    /// cannot be applied.
    pub async fn start(
        config: &SyncConfig,
        dest: Arc<dyn Destination>,
        store: Arc<dyn CursorStore>,
        registry: &TableRegistry,
        sources: &SourceFactory,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let retry = RetryPolicy::from_config(&config.retry);

        let plans: Vec<(&EndpointConfig, Vec<Arc<dyn TableHandler>>)> = config
            .endpoints
            .iter()
            .map(|ep| {
                let handlers = ep.table_names().iter().map(|t| registry.resolve(t)).collect();
                (ep, handlers)
            })
            .collect();

        let all_handlers: Vec<Arc<dyn TableHandler>> =
            plans.iter().flat_map(|(_, h)| h.iter().cloned()).collect();
        let tables = destination_tables(&all_handlers);
        // Connection-class failures are retried like any initial connect;
        // a rejected statement is returned as-is.
        let prepared = connect_with_retry(retry, "destination", || {
            let (dest, tables) = (&dest, &tables);
            async move {
                match dest.prepare(tables).await {
                    Ok(()) => Ok(Ok(())),
                    Err(LoadError::Connection(err)) => Err(err),
                    Err(LoadError::Timeout(after)) => Err(ConnectionError::destination(format!(
                        "table creation timed out after {after:?}"
                    ))),
                    Err(other) => Ok(Err(other)),
                }
            }
        })
        .await?;
        prepared.context("Failed to create destination tables")?;

        let mut tasks = JoinSet::new();
        let mut controls = HashMap::new();
        for (ep, handlers) in plans {
            let driver = sources(ep)
                .with_context(|| format!("Failed to build source driver for endpoint '{}'", ep.id))?;
            let id = ep.endpoint_id();
            let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
            let poller = EndpointPoller::new(
                EndpointSettings {
                    id: id.clone(),
                    schema: ep.source.schema.clone(),
                    fetch_batch_size: ep.fetch_batch_size,
                    poll_interval: ep.poll_interval(),
                    probe_timeout: config.destination.probe_timeout(),
                    retry,
                },
                SourceConnector::new(driver),
                BatchLoader::new(dest.clone(), config.destination.insert_batch_size),
                store.clone(),
                handlers,
                metrics.endpoint(&id),
                rx,
            );
            controls.insert(id.clone(), tx);
            tasks.spawn(async move { (id, poller.run().await) });
        }

        tracing::info!(endpoints = controls.len(), "Supervisor started");
        Ok(Self {
            tasks,
            handle: SupervisorHandle {
                controls: Arc::new(controls),
                metrics,
            },
        })
    }

    #[must_use]
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Wait for every endpoint to stop.
    ///
    /// The first fatal endpoint error stops the remaining endpoints and is
    /// returned once all of them have exited.
    ///
    /// # Errors
    ///
    /// Returns the first [`PollerError`] raised by any endpoint.
    pub async fn wait(mut self) -> Result<(), PollerError> {
        let mut first_err = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok((id, result)) => result.map_err(|err| {
                    tracing::error!(endpoint = id.as_str(), error = %err, "Endpoint failed");
                    err
                }),
                Err(e) => Err(PollerError::panicked("endpoint", &e)),
            };
            if let Err(err) = result {
                if first_err.is_none() {
                    self.handle.shutdown().await;
                    first_err = Some(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
