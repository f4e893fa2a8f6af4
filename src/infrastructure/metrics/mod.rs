//! Prometheus Metrics Module
//!
//! Application-wide metrics collection.
//!
//! # Metrics Collected
//! - Active gateway session gauge
//! - Messages routed by target kind
//! - Delivery-status transitions by resulting status
//! - Presence broadcasts by state
//! - Database query duration histograms

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active gateway sessions gauge
pub static GATEWAY_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "gateway_sessions_active",
            "Number of live gateway sessions",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create GATEWAY_SESSIONS_ACTIVE metric")
});

/// Messages routed counter by target kind ("direct", "conversation")
pub static MESSAGES_ROUTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_routed_total", "Total messages accepted and routed")
            .namespace("chat_relay"),
        &["target"],
    )
    .expect("Failed to create MESSAGES_ROUTED_TOTAL metric")
});

/// Delivery transitions counter by resulting status
pub static DELIVERY_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "delivery_transitions_total",
            "Receipt status transitions by resulting status",
        )
        .namespace("chat_relay"),
        &["status"],
    )
    .expect("Failed to create DELIVERY_TRANSITIONS_TOTAL metric")
});

/// Presence broadcasts counter by state ("online", "offline")
pub static PRESENCE_BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "presence_broadcasts_total",
            "Roster-wide presence broadcasts by state",
        )
        .namespace("chat_relay"),
        &["state"],
    )
    .expect("Failed to create PRESENCE_BROADCASTS_TOTAL metric")
});

/// Database query duration histogram
pub static DB_QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new(
            "db_query_duration_seconds",
            "Database query latency in seconds",
        )
        .namespace("chat_relay")
        .buckets(buckets),
        &["operation", "table"],
    )
    .expect("Failed to create DB_QUERY_DURATION_SECONDS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(GATEWAY_SESSIONS_ACTIVE.clone()))
        .expect("Failed to register GATEWAY_SESSIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_ROUTED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_ROUTED_TOTAL");
    registry
        .register(Box::new(DELIVERY_TRANSITIONS_TOTAL.clone()))
        .expect("Failed to register DELIVERY_TRANSITIONS_TOTAL");
    registry
        .register(Box::new(PRESENCE_BROADCASTS_TOTAL.clone()))
        .expect("Failed to register PRESENCE_BROADCASTS_TOTAL");
    registry
        .register(Box::new(DB_QUERY_DURATION_SECONDS.clone()))
        .expect("Failed to register DB_QUERY_DURATION_SECONDS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to track the live session gauge
pub fn set_active_sessions(count: i64) {
    GATEWAY_SESSIONS_ACTIVE.set(count);
}

/// Helper to record a routed message
pub fn record_message_routed(target: &str) {
    MESSAGES_ROUTED_TOTAL.with_label_values(&[target]).inc();
}

/// Helper to record a receipt transition
pub fn record_delivery_transition(status: &str) {
    DELIVERY_TRANSITIONS_TOTAL
        .with_label_values(&[status])
        .inc();
}

/// Helper to record a presence broadcast
pub fn record_presence_broadcast(state: &str) {
    PRESENCE_BROADCASTS_TOTAL.with_label_values(&[state]).inc();
}

/// Helper to record database query metrics
pub fn record_db_query(operation: &str, table: &str, duration_secs: f64) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, table])
        .observe(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Force lazy initialization
        let _ = &*REGISTRY;
        let _ = &*GATEWAY_SESSIONS_ACTIVE;
        let _ = &*MESSAGES_ROUTED_TOTAL;
        let _ = &*DELIVERY_TRANSITIONS_TOTAL;
        let _ = &*PRESENCE_BROADCASTS_TOTAL;
    }

    #[test]
    fn test_gather_metrics() {
        let metrics = gather_metrics();
        assert!(!metrics.is_empty());
    }

    #[test]
    fn test_record_delivery_transition() {
        record_delivery_transition("delivered");
        let metrics = gather_metrics();
        assert!(metrics.contains("delivery_transitions_total"));
    }
}
