mod http;

pub use http::{
    broadcast_update, publish_update, BroadcastRequest, BroadcastResponse, PublishResponse,
    DEFAULT_BROADCAST_MESSAGE,
};
