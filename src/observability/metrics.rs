//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lbfleet_requests_enqueued_total` (counter)
//! - `lbfleet_requests_completed_total` (counter): by terminal status
//! - `lbfleet_queue_depth` (gauge): requests waiting for dispatch
//! - `lbfleet_agent_calls_total` (counter): coordinator to agent calls by action, outcome
//! - `lbfleet_apply_total` (counter): agent-side applies by action, outcome
//! - `lbfleet_apply_duration_seconds` (histogram)
//! - `lbfleet_bootstrap_total` (counter): by outcome
//! - `lbfleet_checkin_total` (counter): by action, outcome
//! - `lbfleet_connection_state` (gauge): 1=connected, 0=otherwise

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request_enqueued() {
    metrics::counter!("lbfleet_requests_enqueued_total").increment(1);
}

pub fn record_request_completed(status: &'static str) {
    metrics::counter!("lbfleet_requests_completed_total", "status" => status).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    metrics::gauge!("lbfleet_queue_depth").set(depth as f64);
}

pub fn record_agent_call(action: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("lbfleet_agent_calls_total", "action" => action, "outcome" => outcome).increment(1);
}

pub fn record_apply(action: &'static str, success: bool, started: Instant) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("lbfleet_apply_total", "action" => action, "outcome" => outcome).increment(1);
    metrics::histogram!("lbfleet_apply_duration_seconds", "action" => action)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_bootstrap(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("lbfleet_bootstrap_total", "outcome" => outcome).increment(1);
}

pub fn record_checkin(action: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("lbfleet_checkin_total", "action" => action, "outcome" => outcome).increment(1);
}

pub fn record_connection_state(connected: bool) {
    metrics::gauge!("lbfleet_connection_state").set(if connected { 1.0 } else { 0.0 });
}
