//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_requests_total` (counter): terminal outcomes by kind
//! - `pipeline_request_duration_seconds` (histogram): submit-to-outcome latency
//! - `pipeline_rejections_total` (counter): rejections by reason
//! - `pipeline_retries_total` (counter): backoff-and-retry decisions
//! - `pipeline_queue_depth` (gauge): current queue occupancy
//! - `pipeline_in_flight` (gauge): current backend calls holding a gate slot
//! - `pipeline_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `pipeline_circuit_transitions_total` (counter): breaker transitions
//!
//! Recording is a no-op until a recorder is installed, so library users
//! that never call [`init_metrics`] pay only for the facade lookups.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a terminal outcome and its total latency.
pub fn record_outcome(kind: &'static str, latency: Duration) {
    counter!("pipeline_requests_total", "outcome" => kind).increment(1);
    histogram!("pipeline_request_duration_seconds", "outcome" => kind).record(latency.as_secs_f64());
}

pub fn record_rejection(reason: &'static str) {
    counter!("pipeline_rejections_total", "reason" => reason).increment(1);
}

pub fn record_retry() {
    counter!("pipeline_retries_total").increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("pipeline_queue_depth").set(depth as f64);
}

pub fn set_in_flight(in_flight: usize) {
    gauge!("pipeline_in_flight").set(in_flight as f64);
}

pub fn set_circuit_state(breaker: &str, state: CircuitState) {
    gauge!("pipeline_circuit_state", "breaker" => breaker.to_string()).set(state.as_gauge());
}

pub fn record_circuit_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "pipeline_circuit_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}
