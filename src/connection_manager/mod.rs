mod registry;
mod stats;
mod types;

pub use registry::{ConnectionManager, ConnectionStats, Registration};
pub use stats::{format_duration, ProtocolStats, ServerStats, StatsSnapshot};
pub use types::{ConnectionHandle, ConnectionInfo, Delivery, OfferOutcome, Protocol};
