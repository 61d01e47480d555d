use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::ConnectionMetrics;

use super::stats::ServerStats;
use super::types::{ConnectionHandle, ConnectionInfo, Delivery, Protocol};

/// Live connections of both protocols
pub struct ConnectionManager {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    stats: Arc<ServerStats>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub sse: usize,
    pub websocket: usize,
}

impl ConnectionManager {
    pub fn new(stats: Arc<ServerStats>) -> Self {
        Self {
            connections: DashMap::new(),
            stats,
        }
    }

    /// Register a new connection.
    ///
    /// The handle is fully built before it becomes visible to dispatchers.
    /// The returned guard unregisters it when dropped.
    pub fn register(
        self: &Arc<Self>,
        protocol: Protocol,
        topics: impl IntoIterator<Item = String>,
        sender: mpsc::Sender<Delivery>,
    ) -> Registration {
        let handle = Arc::new(ConnectionHandle::new(protocol, topics, sender));
        self.connections.insert(handle.id, handle.clone());

        self.stats.connection_opened(protocol);
        ConnectionMetrics::record_opened(protocol);

        tracing::info!(
            connection_id = %handle.id,
            protocol = %protocol,
            "Connection registered"
        );

        Registration {
            manager: self.clone(),
            handle,
        }
    }

    /// Remove a connection. Only the first call for an id has any effect.
    fn unregister(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        self.stats.connection_closed(handle.protocol);
        let lifetime = chrono::Utc::now()
            .signed_duration_since(handle.connected_at)
            .num_milliseconds() as f64
            / 1000.0;
        ConnectionMetrics::record_closed(handle.protocol, lifetime);

        tracing::info!(
            connection_id = %connection_id,
            protocol = %handle.protocol,
            duration_secs = lifetime,
            "Connection unregistered"
        );
        true
    }

    /// Copy of every live handle. Safe to iterate while connections come and go.
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn get_connections(&self, protocol: Protocol) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|r| r.value().protocol == protocol)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn count_by_protocol(&self, protocol: Protocol) -> usize {
        self.connections
            .iter()
            .filter(|r| r.value().protocol == protocol)
            .count()
    }

    pub fn stats(&self) -> ConnectionStats {
        let (mut sse, mut websocket) = (0, 0);
        for entry in self.connections.iter() {
            match entry.value().protocol {
                Protocol::Sse => sse += 1,
                Protocol::WebSocket => websocket += 1,
            }
        }

        ConnectionStats {
            total: sse + websocket,
            sse,
            websocket,
        }
    }

    pub fn server_stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub async fn connection_infos(&self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for handle in self.get_all_connections() {
            infos.push(ConnectionInfo::from_handle(&handle).await);
        }
        infos.sort_by_key(|info| info.connected_at);
        infos
    }
}

/// Registry entry owned by a connection's event loop.
///
/// Dropping it removes the entry exactly once, on every exit path.
pub struct Registration {
    manager: Arc<ConnectionManager>,
    handle: Arc<ConnectionHandle>,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.manager.unregister(self.handle.id);
    }
}
