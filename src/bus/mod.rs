//! Upstream publish/subscribe bus.
//!
//! The relay only needs two things from the bus: subscribe to a named
//! channel and receive raw byte payloads, and publish a payload onto a
//! channel. Backends:
//!
//! - `RedisBus`: Redis Pub/Sub, one dedicated connection per subscription
//! - `MemoryBus`: in-process broadcast channels (single node, tests)
//!
//! Every live client connection owns its own [`UpstreamBridge`], so a slow
//! or broken client never holds up the bus for anyone else.

mod bridge;
mod factory;
mod memory;
mod redis;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use bridge::UpstreamBridge;
pub use factory::create_bus;
pub use memory::MemoryBus;
pub use self::redis::RedisBus;

/// Raw message body as carried by the bus. Cheap to clone across connections.
pub type Payload = Arc<[u8]>;

/// Stream of payloads for one subscription. Dropping it unsubscribes.
pub type BusSubscription = BoxStream<'static, Payload>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("upstream bus is not configured")]
    Unavailable,
}

#[async_trait]
pub trait UpstreamBus: Send + Sync {
    /// Backend name for logs and introspection
    fn name(&self) -> &'static str;

    /// Open an independent subscription to `channel`
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError>;

    /// Fire-and-forget publish
    async fn publish(&self, channel: &str, payload: Payload) -> Result<(), BusError>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), BusError>;
}
