//! Per-connection subscription to the upstream bus

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use uuid::Uuid;

use super::{BusSubscription, Payload, UpstreamBus};

/// One connection's private view of the bus channel.
///
/// A bridge without a subscription is degraded: `recv` never resolves, so the
/// owning loop keeps serving keepalives and direct broadcasts. Dropping the
/// bridge drops the subscription, which closes the dedicated bus connection.
pub struct UpstreamBridge {
    connection_id: Uuid,
    channel: String,
    subscription: Option<BusSubscription>,
}

impl UpstreamBridge {
    /// Subscribe to `channel`, giving up after `subscribe_timeout`
    pub async fn open(
        bus: Option<&Arc<dyn UpstreamBus>>,
        channel: &str,
        connection_id: Uuid,
        subscribe_timeout: Duration,
    ) -> Self {
        let subscription = match bus {
            Some(bus) => match timeout(subscribe_timeout, bus.subscribe(channel)).await {
                Ok(Ok(subscription)) => Some(subscription),
                Ok(Err(e)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        channel = %channel,
                        error = %e,
                        "Bus subscription failed, connection runs without bus updates"
                    );
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        channel = %channel,
                        timeout_secs = subscribe_timeout.as_secs(),
                        "Bus subscription timed out, connection runs without bus updates"
                    );
                    None
                }
            },
            None => {
                tracing::debug!(
                    connection_id = %connection_id,
                    "No upstream bus configured"
                );
                None
            }
        };

        Self {
            connection_id,
            channel: channel.to_string(),
            subscription,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.subscription.is_none()
    }

    /// Next payload from the bus. Cancel-safe.
    pub async fn recv(&mut self) -> Payload {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                return std::future::pending().await;
            };

            match subscription.next().await {
                Some(payload) => return payload,
                None => {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        channel = %self.channel,
                        "Bus subscription ended, connection continues without bus updates"
                    );
                    self.subscription = None;
                }
            }
        }
    }
}

impl Drop for UpstreamBridge {
    fn drop(&mut self) {
        if self.subscription.take().is_some() {
            tracing::debug!(
                connection_id = %self.connection_id,
                channel = %self.channel,
                "Bus subscription closed"
            );
        }
    }
}
