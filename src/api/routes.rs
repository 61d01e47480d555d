use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;
use crate::triggers::{broadcast_update, publish_update};

use super::health::{connections, debug, health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/dashboard/stats", get(stats))
        .route("/dashboard/debug", get(debug))
        .route("/dashboard/connections", get(connections))
        // Triggers
        .route("/dashboard/broadcast", post(broadcast_update))
        .route("/dashboard/publish", post(publish_update))
}
