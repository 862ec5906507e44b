//! In-memory per-endpoint metrics and health classification.
//!
//! Counters are relaxed atomics; snapshots are eventually consistent.
//! Nothing here feeds back into polling decisions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use regsync_types::state::EndpointId;
use serde::Serialize;

use crate::orchestrator::PollState;

const HEALTHY_WITHIN_MINUTES: i64 = 5;
const WARNING_WITHIN_MINUTES: i64 = 10;
const SYSTEM_HEALTHY_PCT: f64 = 80.0;
const SYSTEM_DEGRADED_PCT: f64 = 50.0;

/// Health of one endpoint, by time since its last successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn classify(last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(last) = last_success else {
            return Self::Unhealthy;
        };
        let since = now - last;
        if since < Duration::minutes(HEALTHY_WITHIN_MINUTES) {
            Self::Healthy
        } else if since < Duration::minutes(WARNING_WITHIN_MINUTES) {
            Self::Warning
        } else {
            Self::Unhealthy
        }
    }
}

/// Health of the whole process, by share of healthy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Default)]
struct Timeline {
    state: Option<PollState>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Counters of one endpoint.
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    polls: AtomicU64,
    successful_polls: AtomicU64,
    failed_polls: AtomicU64,
    records_processed: AtomicU64,
    records_failed: AtomicU64,
    connection_failures: AtomicU64,
    processing_time_ms_total: AtomicU64,
    last_processing_time_ms: AtomicU64,
    timeline: RwLock<Timeline>,
}

impl EndpointMetrics {
    fn with_timeline(&self, f: impl FnOnce(&mut Timeline)) {
        // A poisoned lock only means a writer panicked mid-update.
        let mut guard = self
            .timeline
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard);
    }

    pub fn set_state(&self, state: PollState) {
        self.with_timeline(|t| t.state = Some(state));
    }

    pub fn record_cycle_success(&self, at: DateTime<Utc>) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.successful_polls.fetch_add(1, Ordering::Relaxed);
        self.with_timeline(|t| t.last_success = Some(at));
    }

    pub fn record_cycle_failure(&self, at: DateTime<Utc>, error: &str) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.failed_polls.fetch_add(1, Ordering::Relaxed);
        self.with_timeline(|t| {
            t.last_failure = Some(at);
            t.last_error = Some(error.to_string());
        });
    }

    pub fn record_processed(&self, inserted: u64, failed: u64) {
        self.records_processed.fetch_add(inserted, Ordering::Relaxed);
        self.records_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Wall time of one cycle, successful or not.
    pub fn record_processing_time(&self, ms: u64) {
        self.processing_time_ms_total.fetch_add(ms, Ordering::Relaxed);
        self.last_processing_time_ms.store(ms, Ordering::Relaxed);
    }

    #[must_use]
    pub fn successful_polls(&self) -> u64 {
        self.successful_polls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self, endpoint_id: &EndpointId, now: DateTime<Utc>) -> EndpointSnapshot {
        let timeline = self
            .timeline
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        EndpointSnapshot {
            endpoint_id: endpoint_id.clone(),
            state: timeline.state,
            health: HealthStatus::classify(timeline.last_success, now),
            polls: self.polls.load(Ordering::Relaxed),
            successful_polls: self.successful_polls.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            processing_time_ms_total: self.processing_time_ms_total.load(Ordering::Relaxed),
            last_processing_time_ms: self.last_processing_time_ms.load(Ordering::Relaxed),
            last_success: timeline.last_success,
            last_failure: timeline.last_failure,
            last_error: timeline.last_error.clone(),
        }
    }
}

/// Point-in-time copy of one endpoint's metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    pub endpoint_id: EndpointId,
    pub state: Option<PollState>,
    pub health: HealthStatus,
    pub polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub records_processed: u64,
    pub records_failed: u64,
    pub connection_failures: u64,
    pub processing_time_ms_total: u64,
    pub last_processing_time_ms: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// System-level health document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: SystemStatus,
    pub healthy_endpoints: usize,
    pub total_endpoints: usize,
    pub health_percentage: f64,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// Totals across all endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_endpoints: usize,
    pub total_polls: u64,
    pub total_records_processed: u64,
    pub total_records_failed: u64,
    pub total_connection_failures: u64,
    /// Processed / (processed + failed), in percent; `0` before any record.
    pub success_rate: f64,
}

/// Shared registry of endpoint metrics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    endpoints: RwLock<BTreeMap<EndpointId, Arc<EndpointMetrics>>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics handle for `endpoint`, created on first use.
    pub fn endpoint(&self, endpoint: &EndpointId) -> Arc<EndpointMetrics> {
        if let Some(existing) = self
            .endpoints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(endpoint)
        {
            return existing.clone();
        }
        self.endpoints
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(endpoint.clone())
            .or_default()
            .clone()
    }

    #[must_use]
    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<EndpointSnapshot> {
        self.endpoints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(id, m)| m.snapshot(id, now))
            .collect()
    }

    #[must_use]
    pub fn health(&self, now: DateTime<Utc>) -> SystemHealth {
        system_health(self.snapshots(now))
    }

    #[must_use]
    pub fn summary(&self, now: DateTime<Utc>) -> MetricsSummary {
        summarize(&self.snapshots(now))
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Classify the system from endpoint snapshots. Zero endpoints is
/// `unhealthy`.
#[must_use]
pub fn system_health(endpoints: Vec<EndpointSnapshot>) -> SystemHealth {
    let total = endpoints.len();
    let healthy = endpoints
        .iter()
        .filter(|e| e.health == HealthStatus::Healthy)
        .count();
    let pct = percentage(healthy as u64, total as u64);
    let status = if total > 0 && pct >= SYSTEM_HEALTHY_PCT {
        SystemStatus::Healthy
    } else if total > 0 && pct >= SYSTEM_DEGRADED_PCT {
        SystemStatus::Degraded
    } else {
        SystemStatus::Unhealthy
    };
    SystemHealth {
        status,
        healthy_endpoints: healthy,
        total_endpoints: total,
        health_percentage: pct,
        endpoints,
    }
}

#[must_use]
pub fn summarize(endpoints: &[EndpointSnapshot]) -> MetricsSummary {
    let processed: u64 = endpoints.iter().map(|e| e.records_processed).sum();
    let failed: u64 = endpoints.iter().map(|e| e.records_failed).sum();
    MetricsSummary {
        total_endpoints: endpoints.len(),
        total_polls: endpoints.iter().map(|e| e.polls).sum(),
        total_records_processed: processed,
        total_records_failed: failed,
        total_connection_failures: endpoints.iter().map(|e| e.connection_failures).sum(),
        success_rate: percentage(processed, processed + failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn minutes_ago(m: i64) -> Option<DateTime<Utc>> {
        Some(now() - Duration::minutes(m))
    }

    #[test]
    fn test_endpoint_health_thresholds() {
        assert_eq!(HealthStatus::classify(minutes_ago(4), now()), HealthStatus::Healthy);
        assert_eq!(HealthStatus::classify(minutes_ago(7), now()), HealthStatus::Warning);
        assert_eq!(HealthStatus::classify(minutes_ago(11), now()), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::classify(None, now()), HealthStatus::Unhealthy);
    }

    fn registry_with(healthy: usize, total: usize) -> MetricsRegistry {
        let registry = MetricsRegistry::new();
        for i in 0..total {
            let m = registry.endpoint(&EndpointId::new(format!("ep{i}")));
            let at = if i < healthy {
                minutes_ago(1)
            } else {
                minutes_ago(30)
            };
            m.record_cycle_success(at.unwrap());
        }
        registry
    }

    #[test]
    fn test_system_health_thresholds() {
        assert_eq!(registry_with(4, 5).health(now()).status, SystemStatus::Healthy);
        assert_eq!(registry_with(3, 5).health(now()).status, SystemStatus::Degraded);
        assert_eq!(registry_with(1, 5).health(now()).status, SystemStatus::Unhealthy);
        assert_eq!(registry_with(0, 0).health(now()).status, SystemStatus::Unhealthy);
    }

    #[test]
    fn test_summary_success_rate() {
        let registry = MetricsRegistry::new();
        let a = registry.endpoint(&EndpointId::new("a"));
        let b = registry.endpoint(&EndpointId::new("b"));
        a.record_processed(90, 5);
        b.record_processed(0, 5);
        b.record_connection_failure();

        let summary = registry.summary(now());
        assert_eq!(summary.total_endpoints, 2);
        assert_eq!(summary.total_records_processed, 90);
        assert_eq!(summary.total_records_failed, 10);
        assert_eq!(summary.total_connection_failures, 1);
        assert!((summary.success_rate - 90.0).abs() < 1e-9);

        assert!((MetricsRegistry::new().summary(now()).success_rate).abs() < f64::EPSILON);
    }

    #[test]
    fn test_endpoint_handle_is_shared() {
        let registry = MetricsRegistry::new();
        let id = EndpointId::new("mcb");
        registry.endpoint(&id).record_processed(3, 0);
        registry.endpoint(&id).record_processed(2, 1);
        registry.endpoint(&id).record_processing_time(40);
        registry.endpoint(&id).record_processing_time(15);
        let snap = registry.endpoint(&id).snapshot(&id, now());
        assert_eq!(snap.records_processed, 5);
        assert_eq!(snap.records_failed, 1);
        assert_eq!(snap.processing_time_ms_total, 55);
        assert_eq!(snap.last_processing_time_ms, 15);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        let m = registry.endpoint(&EndpointId::new("mcb"));
        m.set_state(PollState::Sleeping);
        m.record_cycle_failure(now(), "source connection error: refused");
        let json = serde_json::to_value(registry.health(now())).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["endpoints"][0]["endpoint_id"], "mcb");
        assert_eq!(json["endpoints"][0]["state"], "sleeping");
        assert_eq!(json["endpoints"][0]["failed_polls"], 1);
    }
}
