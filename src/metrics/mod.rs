//! Prometheus metrics for the dashboard relay.
//!
//! - Connection metrics (opened, active, lifetime; labelled by protocol)
//! - Message metrics (frames written, keepalives)
//! - Bus metrics (payloads received, decode failures)
//! - Dispatcher metrics (queued, dropped)

mod helpers;

pub use helpers::{encode_metrics, BusMetrics, ConnectionMetrics, DispatchMetrics, MessageMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dashboard_relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections accepted since startup
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections accepted",
        &["protocol"]
    ).unwrap();

    /// Currently open connections
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently open connections",
        &["protocol"]
    ).unwrap();

    pub static ref CONNECTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Connection lifetime in seconds",
        &["protocol"],
        vec![1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Data frames written to clients
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total data frames written to clients",
        &["protocol"]
    ).unwrap();

    /// Heartbeats (SSE) and pings (WebSocket)
    pub static ref KEEPALIVES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_keepalives_sent_total", METRIC_PREFIX),
        "Total keepalive frames written to clients",
        &["protocol"]
    ).unwrap();

    /// Control frames received from WebSocket clients
    pub static ref CONTROL_FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_control_frames_received_total", METRIC_PREFIX),
        "Total control frames received from WebSocket clients",
        &["command"]
    ).unwrap();

    // ============================================================================
    // Bus Metrics
    // ============================================================================

    /// Payloads received from the upstream bus, counted once per subscription
    pub static ref BUS_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        format!("{}_bus_messages_received_total", METRIC_PREFIX),
        "Total payloads received from the upstream bus"
    ).unwrap();

    /// 1 when the upstream bus answered the last ping, 0 otherwise
    pub static ref BUS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_bus_connection_status", METRIC_PREFIX),
        "Upstream bus reachability (1 = reachable, 0 = unreachable or disabled)"
    ).unwrap();

    pub static ref BUS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bus_published_total", METRIC_PREFIX),
        "Total payloads published onto the upstream bus"
    ).unwrap();

    /// Payloads or frames that failed to decode and were dropped
    pub static ref DECODE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total payloads or frames dropped because they failed to decode",
        &["source"]
    ).unwrap();

    // ============================================================================
    // Dispatcher Metrics
    // ============================================================================

    pub static ref DISPATCH_QUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dispatch_queued_total", METRIC_PREFIX),
        "Total deliveries queued to connections"
    ).unwrap();

    /// Deliveries dropped because a connection queue was full or closed
    pub static ref DISPATCH_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_dropped_total", METRIC_PREFIX),
        "Total deliveries dropped",
        &["reason"]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        BUS_MESSAGES_RECEIVED.inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("dashboard_relay_bus_messages_received_total"));
    }

    #[test]
    fn test_labelled_metrics() {
        CONNECTIONS_OPENED_TOTAL.with_label_values(&["sse"]).inc();
        CONNECTIONS_ACTIVE.with_label_values(&["websocket"]).set(3);
        KEEPALIVES_SENT_TOTAL.with_label_values(&["sse"]).inc();
        DISPATCH_DROPPED_TOTAL.with_label_values(&["full"]).inc();
        // Just verify no panics
    }
}
