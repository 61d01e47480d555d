use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::Payload;
use crate::dispatch::DashboardPayload;
use crate::error::PayloadError;

/// Activity text used when a test broadcast names no message
pub const DEFAULT_BROADCAST_MESSAGE: &str = "Test broadcast";

/// Keys that mark a body as a [`BroadcastRequest`] envelope
const ENVELOPE_KEYS: [&str; 3] = ["message", "payload", "topic"];

/// Body of `POST /dashboard/broadcast`.
///
/// The body may be empty, an envelope using only the fields below, or any
/// other JSON document, which is taken as the full payload.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct BroadcastRequest {
    /// Activity text for a synthesized dashboard payload
    pub message: Option<String>,
    /// Payload to deliver as-is
    pub payload: Option<Value>,
    /// Internal topic; defaults to the dashboard updates topic
    pub topic: Option<String>,
}

impl BroadcastRequest {
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let value: Value = serde_json::from_slice(body)?;
        let is_envelope = value
            .as_object()
            .is_some_and(|fields| fields.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())));

        if is_envelope {
            serde_json::from_value(value)
        } else {
            Ok(Self {
                payload: Some(value),
                ..Self::default()
            })
        }
    }

    /// Bytes to fan out: the given payload, or a synthesized one
    pub fn to_payload(&self, uptime: &str) -> Result<Payload, PayloadError> {
        match &self.payload {
            Some(value) => Ok(Payload::from(serde_json::to_vec(value)?)),
            None => {
                let message = self.message.as_deref().unwrap_or(DEFAULT_BROADCAST_MESSAGE);
                DashboardPayload::synthetic(message, uptime).to_payload()
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub topic: String,
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub success: bool,
    pub backend: &'static str,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_synthesizes() {
        let request = BroadcastRequest::from_body(b"").unwrap();
        assert_eq!(request, BroadcastRequest::default());

        let request = BroadcastRequest::from_body(b"  \n").unwrap();
        let payload = request.to_payload("1m0s").unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["system_status"]["uptime"], "1m0s");
        assert_eq!(value["activities"][0]["message"], DEFAULT_BROADCAST_MESSAGE);
    }

    #[test]
    fn test_message_envelope() {
        let request =
            BroadcastRequest::from_body(br#"{"message":"deploy finished","topic":"alerts"}"#)
                .unwrap();
        assert_eq!(request.message.as_deref(), Some("deploy finished"));
        assert_eq!(request.topic.as_deref(), Some("alerts"));

        let value: Value = serde_json::from_slice(&request.to_payload("5s").unwrap()).unwrap();
        assert_eq!(value["activities"][0]["message"], "deploy finished");
    }

    #[test]
    fn test_explicit_payload_envelope() {
        let request =
            BroadcastRequest::from_body(br#"{"payload":{"timestamp":"12:00:00"}}"#).unwrap();
        assert_eq!(
            &*request.to_payload("5s").unwrap(),
            br#"{"timestamp":"12:00:00"}"#
        );
    }

    #[test]
    fn test_full_payload_body() {
        let body = br#"{"timestamp":"12:00:00","activities":[]}"#;
        let request = BroadcastRequest::from_body(body).unwrap();
        assert!(request.topic.is_none());
        assert_eq!(&*request.to_payload("5s").unwrap(), &body[..]);
    }

    #[test]
    fn test_invalid_body() {
        assert!(BroadcastRequest::from_body(b"{not json").is_err());
        // Envelope fields with the wrong type
        assert!(BroadcastRequest::from_body(br#"{"message":42}"#).is_err());
    }
}
