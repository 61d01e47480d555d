//! Redis Pub/Sub backend

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use super::{BusError, BusSubscription, Payload, UpstreamBus};

pub struct RedisBus {
    client: redis::Client,
    url: String,
    /// Shared connection for PUBLISH and PING; subscriptions get their own
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            connection: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, BusError> {
        {
            let guard = self.connection.read().await;
            if let Some(ref c) = *guard {
                return Ok(c.clone());
            }
        }

        let mut guard = self.connection.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        *guard = Some(conn.clone());
        tracing::debug!(url = %self.url, "Redis publish connection established");
        Ok(conn)
    }

    async fn reset_connection(&self, err: &redis::RedisError) {
        if err.is_connection_dropped() || err.is_io_error() {
            *self.connection.write().await = None;
        }
    }
}

#[async_trait]
impl UpstreamBus for RedisBus {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        tracing::debug!(channel = %channel, "Redis subscription established");

        let stream = pubsub
            .into_on_message()
            .map(|msg| Payload::from(msg.get_payload_bytes()));

        Ok(stream.boxed())
    }

    async fn publish(&self, channel: &str, payload: Payload) -> Result<(), BusError> {
        let mut conn = self.get_connection().await?;

        let result: redis::RedisResult<i64> = conn.publish(channel, payload.to_vec()).await;
        match result {
            Ok(receivers) => {
                tracing::debug!(channel = %channel, receivers = receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                self.reset_connection(&e).await;
                Err(BusError::Publish(e.to_string()))
            }
        }
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.get_connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        if let Err(e) = result {
            self.reset_connection(&e).await;
            return Err(BusError::Connection(e.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            RedisBus::new("not a url"),
            Err(BusError::Connection(_))
        ));
    }

    #[test]
    fn test_valid_url_does_not_connect() {
        let bus = RedisBus::new("redis://127.0.0.1:6399").unwrap();
        assert_eq!(bus.url(), "redis://127.0.0.1:6399");
        assert_eq!(bus.name(), "redis");
    }

    #[tokio::test]
    async fn test_ping_unreachable_server_fails() {
        // Nothing listens on port 1
        let bus = RedisBus::new("redis://127.0.0.1:1").unwrap();
        assert!(bus.ping().await.is_err());
    }
}
