//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_rate_limit_requests_total` (counter): admission decisions by key, action
//! - `relay_rate_limit_store_errors_total` (counter): store failures by key
//! - `relay_rate_limit_wait_seconds` (histogram): time spent waiting for admission
//! - `relay_origin_requests_total` (counter): origin fetches by kind, token suffix
//! - `relay_origin_requests_error_total` (counter): failed origin fetches
//! - `relay_origin_request_duration_seconds` (histogram): origin fetch latency
//! - `relay_messages_sent_total` / `relay_messages_error_total` (counters): publish outcomes by kind, token suffix
//! - `relay_circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `relay_circuit_breaker_rejections_total` (counter): calls refused while open
//! - `relay_worker_crashes_total` (counter): worker tasks that ended abnormally
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which is what tests rely on
//! - Token suffixes, never full tokens, are used as labels

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limit_decision(key: &str, allowed: bool) {
    let action = if allowed { "allowed" } else { "denied" };
    metrics::counter!(
        "relay_rate_limit_requests_total",
        "key" => key.to_string(),
        "action" => action
    )
    .increment(1);
}

pub fn record_rate_limit_store_error(key: &str) {
    metrics::counter!("relay_rate_limit_store_errors_total", "key" => key.to_string()).increment(1);
}

pub fn record_rate_limit_wait(key: &str, waited: Duration) {
    metrics::histogram!("relay_rate_limit_wait_seconds", "key" => key.to_string())
        .record(waited.as_secs_f64());
}

/// One origin fetch, successful or not.
pub fn record_origin_request(kind: &str, token_suffix: &str, duration: Duration, ok: bool) {
    metrics::counter!(
        "relay_origin_requests_total",
        "kind" => kind.to_string(),
        "token" => token_suffix.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "relay_origin_request_duration_seconds",
        "kind" => kind.to_string(),
        "token" => token_suffix.to_string()
    )
    .record(duration.as_secs_f64());
    if !ok {
        metrics::counter!(
            "relay_origin_requests_error_total",
            "kind" => kind.to_string(),
            "token" => token_suffix.to_string()
        )
        .increment(1);
    }
}

pub fn record_message_sent(kind: &str, token_suffix: &str) {
    metrics::counter!(
        "relay_messages_sent_total",
        "kind" => kind.to_string(),
        "token" => token_suffix.to_string()
    )
    .increment(1);
}

pub fn record_message_error(kind: &str, token_suffix: &str) {
    metrics::counter!(
        "relay_messages_error_total",
        "kind" => kind.to_string(),
        "token" => token_suffix.to_string()
    )
    .increment(1);
}

pub fn record_breaker_state(dependency: &'static str, scope: &str, state: CircuitState) {
    metrics::gauge!(
        "relay_circuit_breaker_state",
        "dependency" => dependency,
        "scope" => scope.to_string()
    )
    .set(state as u8 as f64);
}

pub fn record_breaker_rejection(dependency: &'static str, scope: &str) {
    metrics::counter!(
        "relay_circuit_breaker_rejections_total",
        "dependency" => dependency,
        "scope" => scope.to_string()
    )
    .increment(1);
}

pub fn record_worker_crash(kind: &str) {
    metrics::counter!("relay_worker_crashes_total", "kind" => kind.to_string()).increment(1);
}
