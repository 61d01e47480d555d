use async_trait::async_trait;

use crate::bus::Payload;

/// Source of the current dashboard state, sent as the first event on a new stream.
///
/// The relay does not own dashboard data. Deployments that can produce a
/// snapshot plug one in through the application state.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Current state as a JSON payload, or `None` when nothing is available
    async fn snapshot(&self) -> Option<Payload>;
}
