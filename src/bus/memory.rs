//! In-process bus backed by tokio broadcast channels

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{BusError, BusSubscription, Payload, UpstreamBus};

/// Per-channel capacity. Subscribers that fall further behind skip messages.
const CHANNEL_CAPACITY: usize = 256;

pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Payload>>,
    capacity: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Payload> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamBus for MemoryBus {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        // Subscribe eagerly so nothing published after this call is missed
        let mut rx = self.sender(channel).subscribe();
        let channel = channel.to_string();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(payload) => yield payload,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            channel = %channel,
                            skipped = skipped,
                            "Memory bus subscriber lagged, messages skipped"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn publish(&self, channel: &str, payload: Payload) -> Result<(), BusError> {
        // No receivers is fine: fan-out is best effort
        let receivers = self.sender(channel).send(payload).unwrap_or(0);
        tracing::debug!(channel = %channel, receivers = receivers, "Published to memory bus");
        Ok(())
    }

    async fn ping(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("updates").await.unwrap();
        let mut second = bus.subscribe("updates").await.unwrap();

        bus.publish("updates", Payload::from(&b"{\"a\":1}"[..]))
            .await
            .unwrap();

        assert_eq!(&*first.next().await.unwrap(), b"{\"a\":1}");
        assert_eq!(&*second.next().await.unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let bus = MemoryBus::new();
        let mut other = bus.subscribe("other").await.unwrap();

        bus.publish("updates", Payload::from(&b"1"[..])).await.unwrap();
        bus.publish("other", Payload::from(&b"2"[..])).await.unwrap();

        assert_eq!(&*other.next().await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        tokio_test::assert_ok!(bus.publish("nobody", Payload::from(&b"x"[..])).await);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("updates").await.unwrap();
        assert_eq!(bus.subscriber_count("updates"), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count("updates"), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_and_continues() {
        let bus = MemoryBus::with_capacity(2);
        let mut sub = bus.subscribe("updates").await.unwrap();

        for i in 0..5u8 {
            bus.publish("updates", Payload::from(&[b'0' + i][..]))
                .await
                .unwrap();
        }

        // Oldest messages were overwritten; the newest ones still arrive
        assert_eq!(&*sub.next().await.unwrap(), b"3");
        assert_eq!(&*sub.next().await.unwrap(), b"4");
    }
}
