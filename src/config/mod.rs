mod settings;

pub use settings::{
    BusConfig, LogConfig, OtelConfig, ServerConfig, Settings, ShutdownConfig, StatsConfig,
    StreamConfig, TopicConfig, TopicMapping, WebSocketConfig,
};
