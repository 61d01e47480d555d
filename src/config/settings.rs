use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty means any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Upstream publish/subscribe bus
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// "redis", "memory" or "none"
    #[serde(default = "default_bus_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Channel carrying dashboard update events
    #[serde(default = "default_bus_channel")]
    pub channel: String,
    /// A connection that cannot subscribe within this many seconds runs without bus updates
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_secs: u64,
}

/// Server-Sent Events connections
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Heartbeat comment interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// A write that does not complete within this many seconds ends the connection
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Frames buffered between the connection loop and the response body
    #[serde(default = "default_stream_buffer")]
    pub buffer_size: usize,
    /// Pending deliveries per connection before the dispatcher starts dropping
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer_size: usize,
}

/// WebSocket (cable) connections
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Application-level ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Control replies queued from the reader task to the connection loop
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer_size: usize,
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer_size: usize,
}

/// External channel class name to internal topic mapping
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_topic_mappings")]
    pub mappings: Vec<TopicMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicMapping {
    pub channel: String,
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Time to wait for connections to drain after the shutdown signal
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Periodic statistics log interval in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_bus_backend() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_bus_channel() -> String {
    "dashboard_updates".to_string()
}

fn default_subscribe_timeout() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_stream_buffer() -> usize {
    32
}

fn default_delivery_buffer() -> usize {
    32
}

fn default_inbound_buffer() -> usize {
    10
}

fn default_topic_mappings() -> Vec<TopicMapping> {
    vec![TopicMapping {
        channel: "DashboardUpdatesChannel".to_string(),
        topic: "dashboard_updates".to_string(),
    }]
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_report_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "dashboard-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("bus.url", default_redis_url())?
            .set_default("stream.heartbeat_interval_secs", default_heartbeat_interval())?
            .set_default("websocket.ping_interval_secs", default_ping_interval())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // DASHBOARD_SERVER__PORT, DASHBOARD_STREAM__HEARTBEAT_INTERVAL_SECS, ...
            .add_source(
                Environment::with_prefix("DASHBOARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            // Plain variables understood by earlier deployments
            .set_override_option("server.port", env::var("PORT").ok())?
            .set_override_option("bus.url", env::var("REDIS_URL").ok())?
            .set_override_option("log.level", env::var("LOG_LEVEL").ok())?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make connection setup panic or spin
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("bus.subscribe_timeout_secs", self.bus.subscribe_timeout_secs),
            ("stream.heartbeat_interval_secs", self.stream.heartbeat_interval_secs),
            ("stream.write_timeout_secs", self.stream.write_timeout_secs),
            ("stream.buffer_size", self.stream.buffer_size as u64),
            ("stream.delivery_buffer_size", self.stream.delivery_buffer_size as u64),
            ("websocket.ping_interval_secs", self.websocket.ping_interval_secs),
            ("websocket.write_timeout_secs", self.websocket.write_timeout_secs),
            ("websocket.inbound_buffer_size", self.websocket.inbound_buffer_size as u64),
            ("websocket.delivery_buffer_size", self.websocket.delivery_buffer_size as u64),
            ("stats.report_interval_secs", self.stats.report_interval_secs),
        ];

        match positive.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(ConfigError::Message(format!(
                "{} must be greater than zero",
                key
            ))),
            None => Ok(()),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BusConfig {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_bus_backend(),
            url: default_redis_url(),
            channel: default_bus_channel(),
            subscribe_timeout_secs: default_subscribe_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            write_timeout_secs: default_write_timeout(),
            buffer_size: default_stream_buffer(),
            delivery_buffer_size: default_delivery_buffer(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            write_timeout_secs: default_write_timeout(),
            inbound_buffer_size: default_inbound_buffer(),
            delivery_buffer_size: default_delivery_buffer(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            mappings: default_topic_mappings(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.bus.channel, "dashboard_updates");
        assert_eq!(settings.stream.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(settings.websocket.ping_interval(), Duration::from_secs(60));
        assert_eq!(settings.server_addr(), "0.0.0.0:3001");
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
        assert_eq!(Settings::default().bus.subscribe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_sizes_and_intervals_rejected() {
        let cases: [fn(&mut Settings); 6] = [
            |s| s.stream.delivery_buffer_size = 0,
            |s| s.stream.buffer_size = 0,
            |s| s.stream.heartbeat_interval_secs = 0,
            |s| s.websocket.inbound_buffer_size = 0,
            |s| s.websocket.ping_interval_secs = 0,
            |s| s.stats.report_interval_secs = 0,
        ];

        for apply in cases {
            let mut settings = Settings::default();
            apply(&mut settings);
            assert!(matches!(settings.validate(), Err(ConfigError::Message(_))));
        }

        let mut settings = Settings::default();
        settings.websocket.delivery_buffer_size = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("websocket.delivery_buffer_size"));
    }

    #[test]
    fn test_default_topic_mapping() {
        let topics = TopicConfig::default();
        assert_eq!(
            topics.mappings,
            vec![TopicMapping {
                channel: "DashboardUpdatesChannel".to_string(),
                topic: "dashboard_updates".to_string(),
            }]
        );
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let settings: Settings = Config::builder()
            .set_override("stream.heartbeat_interval_secs", 5)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.stream.heartbeat_interval_secs, 5);
        assert_eq!(settings.stream.buffer_size, 32);
        assert_eq!(settings.bus.backend, "redis");
    }
}
