//! Metrics collection and exposition.
//!
//! # Metrics
//! - `loopback_dispatch_total` (counter): dispatches by kind (loopback, external) and outcome
//! - `external_cache_requests_total` (counter): cache lookups by result
//!   (hit, miss, coalesced, bypass)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_dispatch(kind: &'static str, outcome: &'static str) {
    metrics::counter!("loopback_dispatch_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_cache(result: &'static str) {
    metrics::counter!("external_cache_requests_total", "result" => result).increment(1);
}
