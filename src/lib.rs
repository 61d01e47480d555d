// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Core fan-out
pub mod bus;
pub mod connection_manager;
pub mod dispatch;

// Application layer
pub mod api;
pub mod server;
pub mod sse;
pub mod triggers;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
