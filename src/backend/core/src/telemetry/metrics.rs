//! Prometheus metrics for event processing, settlement and the artifact source.
//!
//! # Example
//!
//! ```rust,no_run
//! use cascade_core::telemetry::metrics::{EventCounter, SettlementMetrics};
//!
//! EventCounter::increment("sale_made", "applied");
//! SettlementMetrics::record_settled(0.012, 4);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(
        "cascade_events_total",
        "Inbound events by kind and outcome (applied, duplicate, rejected, failed)"
    );
    describe_counter!(
        "cascade_sales_settled_total",
        "Sales settled by this process"
    );
    describe_counter!(
        "cascade_allocations_total",
        "Royalty allocation rows written"
    );
    describe_counter!(
        "cascade_upstream_failures_total",
        "Artifact source lookups that failed after all retries"
    );
    describe_counter!(
        "cascade_sweep_runs_total",
        "Completed maintenance sweeps"
    );
    describe_counter!(
        "cascade_errors_total",
        "Errors constructed, by code and category"
    );
    describe_histogram!(
        "cascade_settlement_duration_seconds",
        "Time to resolve, compute and commit one settlement"
    );
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Counter for inbound events.
pub struct EventCounter;

impl EventCounter {
    pub fn increment(kind: &'static str, outcome: &'static str) {
        counter!("cascade_events_total", "kind" => kind, "outcome" => outcome).increment(1);
    }
}

/// Settlement metrics.
pub struct SettlementMetrics;

impl SettlementMetrics {
    pub fn record_settled(duration_secs: f64, allocations: usize) {
        counter!("cascade_sales_settled_total").increment(1);
        counter!("cascade_allocations_total").increment(allocations as u64);
        histogram!("cascade_settlement_duration_seconds").record(duration_secs);
    }

    pub fn record_upstream_failure() {
        counter!("cascade_upstream_failures_total").increment(1);
    }

    pub fn record_sweep() {
        counter!("cascade_sweep_runs_total").increment(1);
    }
}
