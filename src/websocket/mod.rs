//! Action Cable style WebSocket endpoint (`GET /cable`).
//!
//! Client → server: `{"command":"subscribe"|"unsubscribe","identifier":"{\"channel\":\"...\"}"}`
//!
//! Server → client: `welcome`, `ping` and `confirm_subscription` control
//! frames, plus `{"identifier":..., "message":<payload>}` data frames for
//! subscribed channels.

mod handler;
mod message;
mod topics;

pub use handler::{ws_handler, FramedSession};
pub use message::{data_frame, ChannelIdentifier, ClientCommand, ControlFrame};
pub use topics::TopicMap;
