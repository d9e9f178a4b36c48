//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpcmux_connections_accepted_total` (counter)
//! - `rpcmux_active_connections` (gauge)
//! - `rpcmux_connections_classified_total` (counter): by protocol, rule
//! - `rpcmux_classify_failures_total` (counter): by reason
//! - `rpcmux_handshake_failures_total` (counter): by reason
//! - `rpcmux_rpc_calls_total` (counter): by method, code
//! - `rpcmux_rpc_duration_seconds` (histogram): by method
//! - `rpcmux_gateway_requests_total` (counter): by route, status
//! - `rpcmux_gateway_duration_seconds` (histogram): by route
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality: rule names, route patterns, codes

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("rpcmux_connections_accepted_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    gauge!("rpcmux_active_connections").set(count as f64);
}

pub fn record_classified(protocol: &'static str, rule: &'static str) {
    counter!("rpcmux_connections_classified_total", "protocol" => protocol, "rule" => rule)
        .increment(1);
}

pub fn record_classify_failure(reason: &'static str) {
    counter!("rpcmux_classify_failures_total", "reason" => reason).increment(1);
}

pub fn record_handshake_failure(reason: &'static str) {
    counter!("rpcmux_handshake_failures_total", "reason" => reason).increment(1);
}

pub fn record_rpc(method: &str, code: &'static str, start: Instant) {
    let method = method.to_string();
    counter!("rpcmux_rpc_calls_total", "method" => method.clone(), "code" => code).increment(1);
    histogram!("rpcmux_rpc_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_gateway_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!(
        "rpcmux_gateway_requests_total",
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("rpcmux_gateway_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}
