//! API layer - HTTP endpoint handlers besides the two streaming endpoints.

mod health;
mod metrics;
mod routes;

pub use health::{
    connections, debug, health, stats, BusStats, ConnectionsResponse, DebugResponse,
    ProtocolBreakdown, ServerInfo, StatsResponse, SERVER_NAME,
};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
