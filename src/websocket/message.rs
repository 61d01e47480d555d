use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::payload;
use crate::error::PayloadError;

/// Control frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { identifier: String },
    Unsubscribe { identifier: String },
    /// Anything else is tolerated and ignored
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::Unknown => "unknown",
        }
    }
}

/// The JSON object carried, as a string, in the `identifier` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentifier {
    #[serde(default)]
    pub channel: String,
}

impl ChannelIdentifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// Parse an identifier string and return its channel name
    pub fn parse(identifier: &str) -> Result<Self, PayloadError> {
        let parsed: Self = serde_json::from_str(identifier)?;
        if parsed.channel.is_empty() {
            return Err(PayloadError::MissingChannel);
        }
        Ok(parsed)
    }

    /// Encode as the identifier string, e.g. `{"channel":"DashboardUpdatesChannel"}`
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Control frames sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Welcome,
    Ping,
    ConfirmSubscription { identifier: String },
}

impl ControlFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
struct DataFrame<'a> {
    identifier: &'a str,
    message: &'a Value,
}

/// Wrap a raw dashboard payload for delivery on a channel
pub fn data_frame(identifier: &str, raw: &[u8]) -> Result<String, PayloadError> {
    let message = payload::decode(raw)?;
    Ok(serde_json::to_string(&DataFrame {
        identifier,
        message: &message,
    })?)
}
