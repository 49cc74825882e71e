//! Prometheus metrics for the fan-out pipeline.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Notification losses are counted here so they are queryable instead
//! of invisible in a log stream.

use prometheus::{
    opts, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Counters and gauges for the fan-out pipeline.
/// All metrics are registered in the global default registry.
pub struct FanoutMetrics {
    /// Notification records created, across all cohorts.
    pub notifications_created: IntCounter,
    /// Live pushes attempted, by message kind ("notice" | "board").
    pub live_pushes: IntCounterVec,
    /// Fan-out failures by stage. A non-zero value means notifications
    /// were lost while the primary mutation succeeded.
    pub fanout_failures: IntCounterVec,
    /// Currently registered live connections.
    pub live_connections: IntGauge,
}

impl FanoutMetrics {
    fn new() -> Self {
        let notifications_created = register_int_counter!(opts!(
            "herald_notifications_created_total",
            "Total notification records created"
        ))
        .expect("failed to register herald_notifications_created_total");

        let live_pushes = register_int_counter_vec!(
            opts!("herald_live_pushes_total", "Total live pushes attempted"),
            &["kind"]
        )
        .expect("failed to register herald_live_pushes_total");

        let fanout_failures = register_int_counter_vec!(
            opts!(
                "herald_fanout_failures_total",
                "Fan-out failures swallowed to keep the primary mutation alive"
            ),
            &["stage"]
        )
        .expect("failed to register herald_fanout_failures_total");

        let live_connections = register_int_gauge!(opts!(
            "herald_live_connections",
            "Currently registered live connections"
        ))
        .expect("failed to register herald_live_connections");

        Self {
            notifications_created,
            live_pushes,
            fanout_failures,
            live_connections,
        }
    }
}

static METRICS: OnceLock<FanoutMetrics> = OnceLock::new();

/// Global metrics handle. First call registers everything.
pub fn metrics() -> &'static FanoutMetrics {
    METRICS.get_or_init(FanoutMetrics::new)
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
