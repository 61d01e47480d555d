//! Dashboard update payloads.
//!
//! Payloads are produced by the application that owns the dashboard data.
//! The relay routes them as opaque JSON: a payload is decoded only to check
//! that it is well-formed and re-encoded compactly with its key order intact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::Payload;
use crate::error::PayloadError;

/// Decode a raw payload as JSON
pub fn decode(raw: &[u8]) -> Result<Value, PayloadError> {
    Ok(serde_json::from_slice(raw)?)
}

/// Validate a raw payload and return its compact JSON text
pub fn reencode(raw: &[u8]) -> Result<String, PayloadError> {
    let value = decode(raw)?;
    Ok(serde_json::to_string(&value)?)
}

/// Shape of the dashboard update event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardPayload {
    pub system_status: SystemStatus,
    pub metrics: SystemMetrics,
    pub activities: Vec<Activity>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub uptime: String,
    pub last_check: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub network: String,
    pub response_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub time: String,
    pub message: String,
    pub level: String,
    pub css_class: String,
}

impl DashboardPayload {
    /// A test event of the usual shape, carrying `message` as its only activity
    pub fn synthetic(message: &str, uptime: &str) -> Self {
        let now = Utc::now();
        let clock = now.format("%H:%M:%S").to_string();

        Self {
            system_status: SystemStatus {
                status: "online".to_string(),
                uptime: uptime.to_string(),
                last_check: clock.clone(),
                message: message.to_string(),
            },
            metrics: SystemMetrics {
                cpu: "n/a".to_string(),
                memory: "n/a".to_string(),
                disk: "n/a".to_string(),
                network: "n/a".to_string(),
                response_time: "n/a".to_string(),
            },
            activities: vec![Activity {
                time: clock.clone(),
                message: message.to_string(),
                level: "info".to_string(),
                css_class: "text-info".to_string(),
            }],
            timestamp: clock,
        }
    }

    pub fn to_payload(&self) -> Result<Payload, PayloadError> {
        Ok(Payload::from(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "system_status": {"status": "online", "uptime": "3h", "last_check": "12:00:00", "message": "ok"},
        "metrics": {"cpu": "12%", "memory": "40%", "disk": "70%", "network": "1MB/s", "response_time": "20ms"},
        "activities": [{"time": "12:00:00", "message": "deploy", "level": "info", "css_class": "text-info"}],
        "timestamp": "12:00:00"
    }"#;

    #[test]
    fn test_reencode_is_compact_and_keeps_key_order() {
        let out = reencode(br#"{ "timestamp": "12:00:00",  "b": 1, "a": [1, 2] }"#).unwrap();
        assert_eq!(out, r#"{"timestamp":"12:00:00","b":1,"a":[1,2]}"#);
    }

    #[test]
    fn test_dashboard_payload_survives_relay() {
        let relayed = reencode(SAMPLE.as_bytes()).unwrap();
        let original: DashboardPayload = serde_json::from_str(SAMPLE).unwrap();
        let after: DashboardPayload = serde_json::from_str(&relayed).unwrap();
        assert_eq!(original, after);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(matches!(
            reencode(b"not json at all"),
            Err(PayloadError::InvalidJson(_))
        ));
        assert!(reencode(b"{\"unterminated\": ").is_err());
        assert!(reencode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_synthetic_payload_shape() {
        let payload = DashboardPayload::synthetic("hello", "5m");
        let raw = payload.to_payload().unwrap();
        let value = decode(&raw).unwrap();

        assert_eq!(value["system_status"]["message"], "hello");
        assert_eq!(value["system_status"]["uptime"], "5m");
        assert_eq!(value["activities"][0]["message"], "hello");
        assert_eq!(value["timestamp"].as_str().unwrap().len(), 8);
    }
}
