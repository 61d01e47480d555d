use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::bus::Payload;
use crate::connection_manager::{
    ConnectionHandle, ConnectionManager, Delivery, OfferOutcome, Protocol,
};
use crate::metrics::DispatchMetrics;

/// Maximum number of connections offered to at once
const MAX_CONCURRENT_OFFERS: usize = 100;

/// Result of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// Connections the payload was queued for
    pub delivered: usize,
    /// Connections not subscribed to the topic
    pub skipped: usize,
    /// Connections whose queue was full or closed
    pub dropped: usize,
}

impl DispatchResult {
    fn record(&mut self, outcome: OfferOutcome) {
        match outcome {
            OfferOutcome::Queued => self.delivered += 1,
            OfferOutcome::NotSubscribed => self.skipped += 1,
            OfferOutcome::Full | OfferOutcome::Closed => self.dropped += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_broadcasts: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_dropped: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_broadcasts: self.total_broadcasts.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_broadcasts: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
}

/// Pushes a payload to every registered connection subscribed to a topic.
///
/// The dispatcher only queues. Each connection's own event loop does the
/// write, so a stuck client can at worst fill its own queue and lose
/// deliveries; it never holds up anyone else.
pub struct Dispatcher {
    connection_manager: Arc<ConnectionManager>,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            connection_manager,
            stats: DispatcherStats::default(),
        }
    }

    /// Deliver to every subscribed connection of either protocol
    pub async fn broadcast(&self, topic: &str, payload: Payload) -> DispatchResult {
        let connections = self.connection_manager.get_all_connections();
        self.dispatch(connections, topic, payload).await
    }

    /// Deliver to subscribed connections of one protocol only
    pub async fn broadcast_to(
        &self,
        protocol: Protocol,
        topic: &str,
        payload: Payload,
    ) -> DispatchResult {
        let connections = self.connection_manager.get_connections(protocol);
        self.dispatch(connections, topic, payload).await
    }

    async fn dispatch(
        &self,
        connections: Vec<Arc<ConnectionHandle>>,
        topic: &str,
        payload: Payload,
    ) -> DispatchResult {
        let delivery = Delivery::new(topic, payload);
        let total = connections.len();

        let outcomes: Vec<(OfferOutcome, uuid::Uuid)> = stream::iter(connections)
            .map(|handle| {
                let delivery = delivery.clone();
                async move { (handle.offer(delivery).await, handle.id) }
            })
            .buffer_unordered(MAX_CONCURRENT_OFFERS)
            .collect()
            .await;

        let mut result = DispatchResult::default();
        let (mut full, mut closed) = (0u64, 0u64);
        for (outcome, connection_id) in outcomes {
            match outcome {
                OfferOutcome::Full => {
                    full += 1;
                    tracing::warn!(
                        connection_id = %connection_id,
                        topic = %topic,
                        "Connection queue full, delivery dropped"
                    );
                }
                OfferOutcome::Closed => closed += 1,
                _ => {}
            }
            result.record(outcome);
        }

        self.stats.total_broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.stats
            .total_dropped
            .fetch_add(result.dropped as u64, Ordering::Relaxed);
        DispatchMetrics::record_queued(result.delivered as u64);
        DispatchMetrics::record_full(full);
        DispatchMetrics::record_closed(closed);

        tracing::debug!(
            topic = %topic,
            connections = total,
            delivered = result.delivered,
            skipped = result.skipped,
            dropped = result.dropped,
            "Broadcast dispatched"
        );

        result
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }
}
