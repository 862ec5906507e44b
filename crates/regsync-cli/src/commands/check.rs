use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use regsync_engine::config::{EndpointConfig, SyncConfig};
use regsync_engine::SourceConnector;
use regsync_types::connector::Destination;
use serde::Serialize;

use crate::wiring;

/// Upper bound on one source connect; drivers may block much longer.
const SOURCE_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of probing one component.
#[derive(Debug, Serialize)]
struct Probe {
    ok: bool,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Probe {
    fn finish(started: Instant, result: Result<(), String>) -> Self {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(()) => Self {
                ok: true,
                elapsed_ms,
                error: None,
            },
            Err(message) => Self {
                ok: false,
                elapsed_ms,
                error: Some(message),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SourceCheck {
    endpoint_id: String,
    tables: Vec<String>,
    #[serde(flatten)]
    probe: Probe,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    status: &'static str,
    checked_at: String,
    sources: Vec<SourceCheck>,
    destination: Probe,
    state_backend: Probe,
}

impl CheckReport {
    fn all_ok(&self) -> bool {
        self.sources.iter().all(|s| s.probe.ok) && self.destination.ok && self.state_backend.ok
    }
}

/// Execute the `check` command: probe every source, the destination and the
/// cursor store once and print the result as JSON. Nothing is synced.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = wiring::load_config(config_path)?;

    let mut sources = Vec::with_capacity(config.endpoints.len());
    for ep in &config.endpoints {
        sources.push(SourceCheck {
            endpoint_id: ep.id.clone(),
            tables: ep.tables.clone(),
            probe: check_source(ep, &config).await,
        });
    }
    let destination = check_destination(&config).await;
    let state_backend = check_state(&config).await;

    let mut report = CheckReport {
        status: "healthy",
        checked_at: chrono::Utc::now().to_rfc3339(),
        sources,
        destination,
        state_backend,
    };
    let all_ok = report.all_ok();
    if !all_ok {
        report.status = "unhealthy";
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if all_ok {
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

async fn check_source(ep: &EndpointConfig, config: &SyncConfig) -> Probe {
    let started = Instant::now();
    let driver = match wiring::build_source(ep) {
        Ok(driver) => driver,
        Err(e) => return Probe::finish(started, Err(format!("{e:#}"))),
    };
    let source = SourceConnector::new(driver);

    let result = match tokio::time::timeout(SOURCE_CONNECT_TIMEOUT, source.connect()).await {
        // The blocked connect still holds the driver; leave it to the runtime.
        Err(_) => {
            return Probe::finish(
                started,
                Err(format!(
                    "connect timed out after {}s",
                    SOURCE_CONNECT_TIMEOUT.as_secs()
                )),
            )
        }
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(())) => {
            if source
                .test_connection(config.destination.probe_timeout())
                .await
            {
                Ok(())
            } else {
                Err("probe query failed".to_string())
            }
        }
    };
    source.disconnect().await;
    Probe::finish(started, result)
}

async fn check_destination(config: &SyncConfig) -> Probe {
    let started = Instant::now();
    let dest = match wiring::build_destination(&config.destination) {
        Ok(dest) => dest,
        Err(e) => return Probe::finish(started, Err(format!("{e:#}"))),
    };
    // Pool checkout may take up to the connect timeout before the probe runs.
    let budget = config.destination.probe_timeout() + Duration::from_secs(10);
    let result = match tokio::time::timeout(budget, dest.probe()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("probe timed out after {budget:?}")),
    };
    Probe::finish(started, result)
}

async fn check_state(config: &SyncConfig) -> Probe {
    let started = Instant::now();
    let result = match wiring::open_store(config).await {
        Ok(store) => {
            wiring::close_store(store).await;
            Ok(())
        }
        Err(e) => Err(format!("{e:#}")),
    };
    Probe::finish(started, result)
}
