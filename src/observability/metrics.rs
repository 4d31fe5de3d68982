//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, breaker state, active checks)
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track per-upstream and aggregate metrics
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, upstream
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `proxy_active_check_total` (counter): probe results by upstream
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels for method, upstream, status code

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::BreakerState;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one relayed request.
pub fn record_request(method: &str, status: u16, upstream: &str, elapsed: Duration) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "upstream" => upstream.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_breaker_state(upstream: &str, state: BreakerState) {
    gauge!("proxy_upstream_breaker_state", "upstream" => upstream.to_string())
        .set(state as u8 as f64);
}

pub fn record_active_check(upstream: &str, healthy: bool) {
    let result = if healthy { "success" } else { "failure" };
    counter!(
        "proxy_active_check_total",
        "upstream" => upstream.to_string(),
        "result" => result
    )
    .increment(1);
}
