//! Server-Sent Events stream of dashboard updates.
//!
//! # Endpoint
//!
//! `GET /dashboard/stream`
//!
//! # Wire format
//!
//! - `data: <json>\n\n` for each dashboard update
//! - `: heartbeat\n\n` after each heartbeat interval without data
//!
//! Every stream is bound to the bus channel topic at registration and has
//! its own bus subscription. A single task per connection does all writes.

mod handler;
mod snapshot;

pub use handler::{sse_handler, StreamFrame, StreamSession};
pub use snapshot::SnapshotProvider;
