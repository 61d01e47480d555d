use std::sync::Arc;
use std::time::Duration;

use crate::connection_manager::{ServerStats, StatsSnapshot};
use crate::shutdown::ShutdownSignal;

/// Background task that logs server statistics at a fixed interval
pub struct StatsReporter {
    interval: Duration,
    stats: Arc<ServerStats>,
    shutdown: ShutdownSignal,
}

impl StatsReporter {
    pub fn new(interval: Duration, stats: Arc<ServerStats>, shutdown: ShutdownSignal) -> Self {
        Self {
            interval,
            stats,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Stats reporter started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Stats reporter received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    tracing::info!("{}", summary_line(&self.stats.snapshot()));
                }
            }
        }

        tracing::info!("Stats reporter stopped");
    }
}

/// One-line summary, e.g. `SSE[2/10] WS[1/3] Messages[SSE:40 WS:12 Bus:20] Uptime[5m0s]`
pub fn summary_line(snapshot: &StatsSnapshot) -> String {
    format!(
        "SSE[{}/{}] WS[{}/{}] Messages[SSE:{} WS:{} Bus:{}] Uptime[{}]",
        snapshot.sse.current,
        snapshot.sse.total,
        snapshot.websocket.current,
        snapshot.websocket.total,
        snapshot.sse.messages,
        snapshot.websocket.messages,
        snapshot.bus_messages_received,
        snapshot.uptime_display(),
    )
}
