//! Metrics collection and exposition.
//!
//! # Metrics
//! - `coordinator_queue_depth` (gauge): occupancy per shared queue
//! - `coordinator_capacity_wait_seconds` (histogram): time producers spent in `wait_until_below`
//! - `coordinator_connections_total` (counter): connections accepted by the shared state server
//! - `coordinator_drain_steps_total` (counter): drain step outcomes by step and result

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_queue_depth(queue: &str, depth: usize) {
    metrics::gauge!("coordinator_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

pub fn record_capacity_wait(queue: &str, waited: Duration) {
    metrics::histogram!("coordinator_capacity_wait_seconds", "queue" => queue.to_string())
        .record(waited.as_secs_f64());
}

pub fn record_connection_accepted() {
    metrics::counter!("coordinator_connections_total").increment(1);
}

pub fn record_drain_step(step: &str, ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    metrics::counter!(
        "coordinator_drain_steps_total",
        "step" => step.to_string(),
        "result" => result
    )
    .increment(1);
}
