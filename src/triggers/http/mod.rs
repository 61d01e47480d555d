//! HTTP trigger handlers
//!
//! - Test broadcast straight to connected clients (works without a bus)
//! - Publish onto the upstream bus

mod handlers;
mod models;

pub use handlers::{broadcast_update, publish_update};
pub use models::{BroadcastRequest, BroadcastResponse, PublishResponse, DEFAULT_BROADCAST_MESSAGE};
