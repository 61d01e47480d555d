//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::Protocol;

use super::{
    BUS_MESSAGES_RECEIVED, BUS_PUBLISHED_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_OPENED_TOTAL,
    CONNECTION_DURATION_SECONDS, CONTROL_FRAMES_RECEIVED_TOTAL, DECODE_FAILURES_TOTAL,
    DISPATCH_DROPPED_TOTAL, DISPATCH_QUEUED_TOTAL, KEEPALIVES_SENT_TOTAL, MESSAGES_SENT_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(protocol: Protocol) {
        CONNECTIONS_OPENED_TOTAL
            .with_label_values(&[protocol.as_str()])
            .inc();
        CONNECTIONS_ACTIVE.with_label_values(&[protocol.as_str()]).inc();
    }

    pub fn record_closed(protocol: Protocol, lifetime_secs: f64) {
        CONNECTIONS_ACTIVE.with_label_values(&[protocol.as_str()]).dec();
        CONNECTION_DURATION_SECONDS
            .with_label_values(&[protocol.as_str()])
            .observe(lifetime_secs);
    }
}

/// Helper struct for recording frames written to and read from clients
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_sent(protocol: Protocol) {
        MESSAGES_SENT_TOTAL.with_label_values(&[protocol.as_str()]).inc();
    }

    pub fn record_keepalive(protocol: Protocol) {
        KEEPALIVES_SENT_TOTAL
            .with_label_values(&[protocol.as_str()])
            .inc();
    }

    /// Record a control frame from a WebSocket client ("subscribe", "unsubscribe", "unknown")
    pub fn record_control(command: &str) {
        CONTROL_FRAMES_RECEIVED_TOTAL
            .with_label_values(&[command])
            .inc();
    }
}

pub struct BusMetrics;

impl BusMetrics {
    pub fn record_received() {
        BUS_MESSAGES_RECEIVED.inc();
    }

    pub fn record_published() {
        BUS_PUBLISHED_TOTAL.inc();
    }

    /// Record a payload dropped because it was not valid JSON
    pub fn record_payload_decode_failure() {
        DECODE_FAILURES_TOTAL.with_label_values(&["payload"]).inc();
    }

    /// Record an inbound control frame that could not be parsed
    pub fn record_frame_decode_failure() {
        DECODE_FAILURES_TOTAL.with_label_values(&["frame"]).inc();
    }
}

pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_queued(count: u64) {
        DISPATCH_QUEUED_TOTAL.inc_by(count);
    }

    /// Record deliveries dropped because the connection queue was full
    pub fn record_full(count: u64) {
        if count > 0 {
            DISPATCH_DROPPED_TOTAL
                .with_label_values(&["full"])
                .inc_by(count);
        }
    }

    /// Record deliveries dropped because the connection was closing
    pub fn record_closed(count: u64) {
        if count > 0 {
            DISPATCH_DROPPED_TOTAL
                .with_label_values(&["closed"])
                .inc_by(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_do_not_panic() {
        ConnectionMetrics::record_opened(Protocol::Sse);
        ConnectionMetrics::record_closed(Protocol::Sse, 12.5);
        MessageMetrics::record_sent(Protocol::WebSocket);
        MessageMetrics::record_keepalive(Protocol::WebSocket);
        MessageMetrics::record_control("subscribe");
        BusMetrics::record_received();
        BusMetrics::record_payload_decode_failure();
        DispatchMetrics::record_queued(4);
        DispatchMetrics::record_full(0);
        DispatchMetrics::record_closed(1);
    }

    #[test]
    fn test_encoded_output_has_protocol_labels() {
        MessageMetrics::record_sent(Protocol::Sse);
        let output = encode_metrics().unwrap();
        assert!(output.contains("dashboard_relay_messages_sent_total{protocol=\"sse\"}"));
    }
}
