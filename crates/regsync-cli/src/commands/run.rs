use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use regsync_engine::{Supervisor, TableRegistry};

use crate::wiring;

/// Execute the `run` command: poll every endpoint until Ctrl-C or the first
/// fatal endpoint error.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = wiring::load_config(config_path)?;
    tracing::info!(
        endpoints = config.endpoints.len(),
        state_backend = ?config.state.backend,
        "Config loaded"
    );

    let store = wiring::open_store(&config).await?;
    let dest = wiring::build_destination(&config.destination)?;
    let registry = TableRegistry::builtin();

    let supervisor = match Supervisor::start(
        &config,
        dest,
        Arc::clone(&store),
        &registry,
        &wiring::build_source,
    )
    .await
    {
        Ok(supervisor) => supervisor,
        Err(e) => {
            wiring::close_store(store).await;
            return Err(e);
        }
    };
    let handle = supervisor.handle();

    let signal_handle = handle.clone();
    let signals = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, finishing in-flight cycles");
                signal_handle.shutdown().await;
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {e}"),
        }
    });

    let result = supervisor.wait().await;
    signals.abort();

    let summary = handle.metrics().summary(chrono::Utc::now());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    wiring::close_store(store).await;

    result.context("Sync stopped on a fatal endpoint error")
}
