//! Bus doubles shared by unit tests

use async_trait::async_trait;

use super::{BusError, BusSubscription, Payload, UpstreamBus};

/// Accepts every call and never answers, like a blackholed Redis
pub(crate) struct HangingBus;

#[async_trait]
impl UpstreamBus for HangingBus {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn subscribe(&self, _channel: &str) -> Result<BusSubscription, BusError> {
        std::future::pending().await
    }

    async fn publish(&self, _channel: &str, _payload: Payload) -> Result<(), BusError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), BusError> {
        std::future::pending().await
    }
}
