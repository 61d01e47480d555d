//! Bus backend factory

use std::sync::Arc;

use crate::config::BusConfig;

use super::memory::MemoryBus;
use super::redis::RedisBus;
use super::UpstreamBus;

/// Create the upstream bus selected by configuration.
///
/// - `"redis"` (default): `RedisBus`, pinged once at startup
/// - `"memory"`: `MemoryBus`
/// - `"none"`: no bus
///
/// Returns `None` when no bus is configured or Redis cannot be reached.
/// The server then runs in degraded mode: connections stay up with
/// keepalives only and the broadcast endpoint still works.
pub async fn create_bus(settings: &BusConfig) -> Option<Arc<dyn UpstreamBus>> {
    match settings.backend.as_str() {
        "none" => {
            tracing::info!("Upstream bus disabled");
            None
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-process bus");
            Some(Arc::new(MemoryBus::new()))
        }
        "redis" => connect_redis(&settings.url).await,
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown bus backend requested, falling back to redis"
            );
            connect_redis(&settings.url).await
        }
    }
}

async fn connect_redis(url: &str) -> Option<Arc<dyn UpstreamBus>> {
    let bus = match RedisBus::new(url) {
        Ok(bus) => bus,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid Redis URL, running without upstream bus");
            return None;
        }
    };

    match bus.ping().await {
        Ok(()) => {
            tracing::info!(backend = "redis", url = %url, "Connected to Redis");
            Some(Arc::new(bus))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                url = %url,
                "Redis not available, real-time updates from the bus are disabled"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str, url: &str) -> BusConfig {
        BusConfig {
            backend: backend.to_string(),
            url: url.to_string(),
            channel: "dashboard_updates".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_none_backend() {
        assert!(create_bus(&config("none", "")).await.is_none());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let bus = create_bus(&config("memory", "")).await.unwrap();
        assert_eq!(bus.name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades() {
        assert!(create_bus(&config("redis", "redis://127.0.0.1:1"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_redis_url_degrades() {
        assert!(create_bus(&config("redis", "::nonsense::")).await.is_none());
    }
}
