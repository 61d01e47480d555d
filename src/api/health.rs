//! Health check, statistics and debug endpoints.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::connection_manager::{ConnectionInfo, ConnectionStats, ProtocolStats};
use crate::dispatch::DispatcherStatsSnapshot;
use crate::server::AppState;

pub const SERVER_NAME: &str = "Dashboard Relay";

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub server: ServerInfo,
    pub connections: ProtocolBreakdown,
    pub redis: BusStats,
    pub dispatcher: DispatcherStatsSnapshot,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub status: &'static str,
    pub uptime: String,
    pub started: String,
}

#[derive(Debug, Serialize)]
pub struct ProtocolBreakdown {
    pub sse: ProtocolStats,
    pub websocket: ProtocolStats,
}

#[derive(Debug, Serialize)]
pub struct BusStats {
    pub messages_received: u64,
    pub backend: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub current_time: String,
    pub server: &'static str,
    pub status: &'static str,
    pub connections: ConnectionStats,
    pub uptime: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub total: usize,
    pub connections: Vec<ConnectionInfo>,
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /dashboard/stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let snapshot = state.stats.snapshot();

    Json(StatsResponse {
        server: ServerInfo {
            name: SERVER_NAME,
            status: "running",
            uptime: snapshot.uptime_display(),
            started: snapshot.started_at.format(DATE_TIME_FORMAT).to_string(),
        },
        connections: ProtocolBreakdown {
            sse: snapshot.sse,
            websocket: snapshot.websocket,
        },
        redis: BusStats {
            messages_received: snapshot.bus_messages_received,
            backend: state.bus.as_ref().map(|bus| bus.name()),
        },
        dispatcher: state.dispatcher.stats(),
        timestamp: Utc::now().format(DATE_TIME_FORMAT).to_string(),
    })
}

/// GET /dashboard/debug
pub async fn debug(State(state): State<AppState>) -> Json<DebugResponse> {
    Json(DebugResponse {
        current_time: Utc::now().format("%H:%M:%S").to_string(),
        server: SERVER_NAME,
        status: "running",
        connections: state.connection_manager.stats(),
        uptime: state.stats.snapshot().uptime_display(),
    })
}

/// GET /dashboard/connections
pub async fn connections(State(state): State<AppState>) -> Json<ConnectionsResponse> {
    let connections = state.connection_manager.connection_infos().await;

    Json(ConnectionsResponse {
        total: connections.len(),
        connections,
    })
}
