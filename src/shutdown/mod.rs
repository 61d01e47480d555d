//! Graceful shutdown handling for the relay.
//!
//! A single process-wide [`Shutdown`] signal is shared by every connection
//! loop and background task. [`GracefulShutdown`] runs the sequence:
//! 1. Log final statistics
//! 2. Fire the signal so every connection loop exits on its next wait
//! 3. Wait for the registry to drain

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;

/// Process-wide cancellation signal
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Later calls have no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver for one task. Observes a trigger that happened before it was created.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered. Cancel-safe.
    pub async fn recv(&mut self) {
        // A closed channel means the owner is gone, which is shutdown too
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// Handles graceful shutdown of the relay
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    shutdown: Shutdown,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        shutdown: Shutdown,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            connection_manager,
            shutdown,
            drain_timeout,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connection_manager.count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = tokio::time::Instant::now();
        let mut result = ShutdownResult {
            connections_at_start: self.connection_manager.count(),
            ..Default::default()
        };

        tracing::info!(reason = %reason, "Starting graceful shutdown");
        self.log_final_stats();

        tracing::info!("Signaling connections and background tasks to stop");
        self.shutdown.trigger();

        result.remaining = self.wait_for_connections_to_close().await;
        result.connections_closed = result.connections_at_start.saturating_sub(result.remaining);
        result.duration = start.elapsed();
        result.success = result.remaining == 0;

        tracing::info!(
            connections_closed = result.connections_closed,
            remaining = result.remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    fn log_final_stats(&self) {
        let snapshot = self.connection_manager.server_stats().snapshot();

        tracing::info!(
            uptime = %snapshot.uptime_display(),
            sse_total = snapshot.sse.total,
            sse_current = snapshot.sse.current,
            sse_messages = snapshot.sse.messages,
            websocket_total = snapshot.websocket.total,
            websocket_current = snapshot.websocket.current,
            websocket_messages = snapshot.websocket.messages,
            bus_messages = snapshot.bus_messages_received,
            messages_per_sec = format_args!("{:.2}", snapshot.messages_per_sec()),
            connections_per_sec = format_args!("{:.2}", snapshot.connections_per_sec()),
            "Final statistics"
        );
    }

    /// Poll the registry until it is empty or the drain timeout passes.
    /// Returns the number of connections still open.
    async fn wait_for_connections_to_close(&self) -> usize {
        if self.connection_manager.count() == 0 {
            return 0;
        }

        let wait_future = async {
            while self.connection_manager.count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        let _ = timeout(self.drain_timeout, wait_future).await;

        let remaining = self.connection_manager.count();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close before the drain timeout"
            );
        }
        remaining
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// True when every connection closed within the drain timeout
    pub success: bool,
    pub connections_at_start: usize,
    pub connections_closed: usize,
    pub remaining: usize,
    pub duration: Duration,
}
