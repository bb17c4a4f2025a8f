//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sentry_rpc_requests_total` (counter): wallet RPC calls by method, outcome
//! - `sentry_wallet_emissions_total` (counter): tracker emissions by kind
//! - `sentry_transactions_total` (counter): relay results by outcome
//! - `sentry_connection_status` (gauge): 0=disconnected, 1=connecting, 2=connected, 3=reconnecting
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the Prometheus recorder
//! - Labels are low-cardinality strings (method names, error kinds)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::session::ConnectionStatus;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_request(method: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("sentry_rpc_requests_total", "method" => method.to_string(), "outcome" => outcome).increment(1);
}

/// `kind` is `state`, `disconnected` or an error kind.
pub fn record_wallet_emission(kind: &str) {
    counter!("sentry_wallet_emissions_total", "kind" => kind.to_string()).increment(1);
}

/// `outcome` is `submitted` or an error kind.
pub fn record_transaction(outcome: &str) {
    counter!("sentry_transactions_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_connection_status(status: ConnectionStatus) {
    gauge!("sentry_connection_status").set(status.as_gauge());
}
