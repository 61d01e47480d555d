//! Connection handle and related types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::bus::Payload;

/// Wire protocol family of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Server-Sent Events
    Sse,
    WebSocket,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sse => "sse",
            Protocol::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload on its way to one connection's event loop
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Arc<str>,
    pub payload: Payload,
}

impl Delivery {
    pub fn new(topic: impl Into<Arc<str>>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// What happened when a delivery was offered to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Queued,
    /// The connection does not subscribe to the delivery's topic
    NotSubscribed,
    /// The connection's queue is full; the delivery was dropped
    Full,
    /// The connection's event loop has exited
    Closed,
}

/// Handle for a single client connection.
///
/// The handle never touches the client transport. Deliveries are queued on
/// `sender` and the owning event loop is the only writer to the socket.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub protocol: Protocol,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix milliseconds)
    last_activity: AtomicI64,
    subscriptions: RwLock<HashSet<String>>,
    sender: mpsc::Sender<Delivery>,
}

impl ConnectionHandle {
    pub fn new(
        protocol: Protocol,
        topics: impl IntoIterator<Item = String>,
        sender: mpsc::Sender<Delivery>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            protocol,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            subscriptions: RwLock::new(topics.into_iter().collect()),
            sender,
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or(self.connected_at)
    }

    /// Add a topic. Returns false if it was already present.
    pub async fn subscribe(&self, topic: &str) -> bool {
        self.subscriptions.write().await.insert(topic.to_string())
    }

    /// Remove a topic. Returns false if it was not present.
    pub async fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions.write().await.remove(topic)
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.read().await.contains(topic)
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Queue a delivery for this connection without waiting.
    ///
    /// This is the only path by which payloads reach a connection, whether
    /// they come from the connection's own bus subscription or from a direct
    /// broadcast. A full queue drops the delivery instead of blocking the
    /// caller.
    pub async fn offer(&self, delivery: Delivery) -> OfferOutcome {
        if !self.is_subscribed(&delivery.topic).await {
            return OfferOutcome::NotSubscribed;
        }

        match self.sender.try_send(delivery) {
            Ok(()) => OfferOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => OfferOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => OfferOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Summary of one connection for introspection endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub protocol: Protocol,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub subscriptions: Vec<String>,
}

impl ConnectionInfo {
    pub async fn from_handle(handle: &ConnectionHandle) -> Self {
        Self {
            id: handle.id,
            protocol: handle.protocol,
            connected_at: handle.connected_at,
            last_activity: handle.last_activity(),
            subscriptions: handle.subscriptions().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Payload {
        Payload::from(&b"{}"[..])
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::Sse.as_str(), "sse");
        assert_eq!(Protocol::WebSocket.to_string(), "websocket");
        assert_eq!(
            serde_json::to_string(&Protocol::WebSocket).unwrap(),
            "\"websocket\""
        );
    }

    #[test]
    fn test_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let ids: HashSet<Uuid> = (0..1000)
            .map(|_| ConnectionHandle::new(Protocol::Sse, Vec::new(), tx.clone()).id)
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_offer_requires_subscription() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(Protocol::WebSocket, Vec::new(), tx);

        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::NotSubscribed
        );

        assert!(handle.subscribe("dashboard_updates").await);
        assert!(!handle.subscribe("dashboard_updates").await);
        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::Queued
        );
        assert_eq!(&*rx.recv().await.unwrap().topic, "dashboard_updates");

        assert!(handle.unsubscribe("dashboard_updates").await);
        assert!(!handle.unsubscribe("dashboard_updates").await);
        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::NotSubscribed
        );
    }

    #[tokio::test]
    async fn test_offer_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let handle =
            ConnectionHandle::new(Protocol::Sse, vec!["dashboard_updates".to_string()], tx);

        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::Queued
        );
        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::Full
        );

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.offer(Delivery::new("dashboard_updates", payload())).await,
            OfferOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_activity_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(Protocol::Sse, Vec::new(), tx);
        let before = handle.last_activity();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle.update_activity();

        assert!(handle.last_activity() > before);
    }
}
