mod dispatcher;
pub mod payload;

pub use dispatcher::{DispatchResult, Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use payload::DashboardPayload;
