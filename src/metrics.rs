//! Metrics initialization for Prometheus exporter.
//!
//! Counters are always recorded through the `metrics` facade. Without an
//! installed recorder they cost nothing.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Queries handled, labelled by `decision`.
pub const QUERIES_TOTAL: &str = "dnsgate_queries_total";

/// Datagrams or exchanges abandoned, labelled by `reason`.
pub const DROPPED_TOTAL: &str = "dnsgate_dropped_total";

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    Ok(())
}

/// Count one handled query. `decision` is `forward` or an action label.
pub fn record_query(decision: &'static str) {
    metrics::counter!(QUERIES_TOTAL, "decision" => decision).increment(1);
}

/// Count one abandoned datagram or exchange.
pub fn record_dropped(reason: &'static str) {
    metrics::counter!(DROPPED_TOTAL, "reason" => reason).increment(1);
}
