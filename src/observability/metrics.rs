//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_sessions_active` (gauge): live job sessions
//! - `gateway_registered_connections` (gauge): connections in the correlation store
//! - `gateway_jobs_dispatched_total` (counter): job dispatches by outcome
//! - `gateway_notifications_total` (counter): broker messages by outcome
//! - `gateway_proxy_requests_total` (counter): proxied requests by service, status
//! - `gateway_proxy_request_duration_seconds` (histogram): proxy latency by service
//!
//! Every recorder is a no-op until [`init_metrics`] installs the exporter.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    ::metrics::gauge!("gateway_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    ::metrics::gauge!("gateway_sessions_active").decrement(1.0);
}

pub fn record_registered_connections(count: usize) {
    ::metrics::gauge!("gateway_registered_connections").set(count as f64);
}

/// `outcome` is `accepted` or `failed`.
pub fn record_job_dispatch(outcome: &'static str) {
    ::metrics::counter!("gateway_jobs_dispatched_total", "outcome" => outcome).increment(1);
}

/// `outcome` is one of `delivered`, `parse_error`, `unknown_key`, `write_error`.
pub fn record_notification(outcome: &'static str) {
    ::metrics::counter!("gateway_notifications_total", "outcome" => outcome).increment(1);
}

pub fn record_proxy_request(service: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "gateway_proxy_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "gateway_proxy_request_duration_seconds",
        "service" => service.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
