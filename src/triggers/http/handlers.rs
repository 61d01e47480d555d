//! HTTP trigger handlers

use axum::{body::Bytes, extract::State, Json};
use chrono::Utc;

use crate::bus::{BusError, Payload};
use crate::dispatch::payload;
use crate::error::{AppError, Result};
use crate::metrics::BusMetrics;
use crate::server::AppState;

use super::models::{BroadcastRequest, BroadcastResponse, PublishResponse};

/// Push a payload straight to every eligible connection, bypassing the bus
#[tracing::instrument(name = "http.broadcast_update", skip(state, body), fields(body_len = body.len()))]
pub async fn broadcast_update(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BroadcastResponse>> {
    let request = BroadcastRequest::from_body(&body)
        .map_err(|e| AppError::Validation(format!("Invalid broadcast body: {}", e)))?;

    let topic = request
        .topic
        .clone()
        .unwrap_or_else(|| state.settings.bus.channel.clone());
    let payload = request
        .to_payload(&state.stats.snapshot().uptime_display())
        .map_err(|e| AppError::Internal(format!("Failed to encode payload: {}", e)))?;

    let result = state.dispatcher.broadcast(&topic, payload).await;

    tracing::info!(
        topic = %topic,
        delivered = result.delivered,
        skipped = result.skipped,
        dropped = result.dropped,
        "Test broadcast dispatched"
    );

    Ok(Json(BroadcastResponse {
        success: true,
        topic,
        delivered: result.delivered,
        skipped: result.skipped,
        dropped: result.dropped,
        timestamp: Utc::now(),
    }))
}

/// Publish a payload onto the upstream bus channel
#[tracing::instrument(name = "http.publish_update", skip(state, body), fields(body_len = body.len()))]
pub async fn publish_update(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PublishResponse>> {
    let bus = state.bus.as_ref().ok_or(BusError::Unavailable)?;

    let encoded = payload::reencode(&body)
        .map_err(|e| AppError::Validation(format!("Invalid payload: {}", e)))?;

    let channel = state.settings.bus.channel.clone();
    bus.publish(&channel, Payload::from(encoded.into_bytes())).await?;
    BusMetrics::record_published();

    tracing::debug!(channel = %channel, backend = bus.name(), "Payload published to bus");

    Ok(Json(PublishResponse {
        success: true,
        backend: bus.name(),
        channel,
        timestamp: Utc::now(),
    }))
}
