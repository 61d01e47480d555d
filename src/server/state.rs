use std::sync::Arc;

use crate::bus::UpstreamBus;
use crate::config::Settings;
use crate::connection_manager::{ConnectionManager, ServerStats};
use crate::dispatch::Dispatcher;
use crate::shutdown::Shutdown;
use crate::sse::SnapshotProvider;
use crate::websocket::TopicMap;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub stats: Arc<ServerStats>,
    /// `None` when running without an upstream bus
    pub bus: Option<Arc<dyn UpstreamBus>>,
    pub topics: Arc<TopicMap>,
    pub shutdown: Shutdown,
    pub snapshot_provider: Option<Arc<dyn SnapshotProvider>>,
}

impl AppState {
    pub fn new(settings: Settings, bus: Option<Arc<dyn UpstreamBus>>) -> Self {
        let stats = Arc::new(ServerStats::new());
        let connection_manager = Arc::new(ConnectionManager::new(stats.clone()));
        let dispatcher = Arc::new(Dispatcher::new(connection_manager.clone()));
        let topics = Arc::new(TopicMap::new(&settings.topics.mappings));

        Self {
            settings: Arc::new(settings),
            connection_manager,
            dispatcher,
            stats,
            bus,
            topics,
            shutdown: Shutdown::new(),
            snapshot_provider: None,
        }
    }

    pub fn with_snapshot_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshot_provider = Some(provider);
        self
    }
}
