use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::bus::BusError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to decode an upstream payload or an inbound control frame.
///
/// Never fatal for a connection: the offending message is logged and dropped.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("channel identifier is missing a channel name")]
    MissingChannel,
}

/// A write to a client that did not go through.
///
/// Always treated as the peer having gone away.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed: {0}")]
    Closed(String),

    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Bus(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Upstream bus unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::SERVICE_UNAVAILABLE, "BUS_UNAVAILABLE", client_msg, log_msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
