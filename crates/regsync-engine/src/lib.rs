//! Polling engine for the regsync core-banking to regulatory-reporting sync.
//!
//! One [`EndpointPoller`] per source system fetches rows past a persisted
//! cursor, reshapes them through the [`tables`] registry, upserts them via
//! [`BatchLoader`] and only then advances the cursor.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod source;
pub mod supervisor;
pub mod tables;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use error::PollerError;
pub use loader::{BatchLoader, LoadReport};
pub use metrics::{HealthStatus, MetricsRegistry, SystemHealth, SystemStatus};
pub use orchestrator::{Control, EndpointPoller, EndpointSettings, PollState};
pub use retry::RetryPolicy;
pub use source::SourceConnector;
pub use supervisor::{SourceFactory, Supervisor, SupervisorHandle};
pub use tables::TableRegistry;
