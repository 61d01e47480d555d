//! Prometheus metrics endpoint.

use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use tokio::time::timeout;

use crate::connection_manager::Protocol;
use crate::metrics;
use crate::server::AppState;

/// Upper bound on the bus reachability probe during a scrape
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are derived from state rather than updated inline
async fn update_metrics_from_state(state: &AppState) {
    for protocol in [Protocol::Sse, Protocol::WebSocket] {
        metrics::CONNECTIONS_ACTIVE
            .with_label_values(&[protocol.as_str()])
            .set(state.connection_manager.count_by_protocol(protocol) as i64);
    }

    let reachable = match &state.bus {
        Some(bus) => matches!(timeout(PING_TIMEOUT, bus.ping()).await, Ok(Ok(()))),
        None => false,
    };
    metrics::BUS_CONNECTION_STATUS.set(i64::from(reachable));
}
