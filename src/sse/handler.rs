//! SSE handler implementation.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::bus::UpstreamBridge;
use crate::config::StreamConfig;
use crate::connection_manager::{Delivery, OfferOutcome, Protocol, Registration, ServerStats};
use crate::dispatch::payload;
use crate::error::TransportError;
use crate::metrics::{BusMetrics, MessageMetrics};
use crate::server::AppState;
use crate::shutdown::ShutdownSignal;

use super::SnapshotProvider;

/// One unit written to the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Compact JSON text of one dashboard update
    Data(String),
    Heartbeat,
}

impl StreamFrame {
    pub fn into_event(self) -> Event {
        match self {
            StreamFrame::Data(json) => Event::default().data(json),
            StreamFrame::Heartbeat => Event::default().comment("heartbeat"),
        }
    }

    /// Text as it appears on the wire
    pub fn encode(&self) -> String {
        match self {
            StreamFrame::Data(json) => format!("data: {}\n\n", json),
            StreamFrame::Heartbeat => ": heartbeat\n\n".to_string(),
        }
    }
}

/// SSE upgrade handler
#[tracing::instrument(name = "sse.connect", skip(state))]
pub async fn sse_handler(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel::<StreamFrame>(state.settings.stream.buffer_size);

    let session = StreamSession::open(&state).await;
    tracing::info!(connection_id = %session.id(), "SSE connection established");
    tokio::spawn(session.run(tx));

    let stream = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_event()));

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// A registered SSE connection and everything its event loop owns.
///
/// Frames are written to a channel feeding the response body. When the
/// client goes away the body is dropped, the channel closes and the loop ends.
pub struct StreamSession {
    registration: Registration,
    deliveries: mpsc::Receiver<Delivery>,
    bridge: UpstreamBridge,
    /// Keepalives are scheduled from here, not from when the loop starts
    opened_at: Instant,
    topic: Arc<str>,
    config: StreamConfig,
    shutdown: ShutdownSignal,
    stats: Arc<ServerStats>,
    snapshot: Option<Arc<dyn SnapshotProvider>>,
}

impl StreamSession {
    /// Register a stream bound to the bus channel topic and subscribe it to the bus
    pub async fn open(state: &AppState) -> Self {
        let config = state.settings.stream.clone();
        let channel = state.settings.bus.channel.as_str();

        let (tx, deliveries) = mpsc::channel(config.delivery_buffer_size);
        let registration =
            state
                .connection_manager
                .register(Protocol::Sse, [channel.to_string()], tx);
        let opened_at = Instant::now();
        let bridge = UpstreamBridge::open(
            state.bus.as_ref(),
            channel,
            registration.id(),
            state.settings.bus.subscribe_timeout(),
        )
        .await;

        Self {
            registration,
            deliveries,
            bridge,
            opened_at,
            topic: Arc::from(channel),
            config,
            shutdown: state.shutdown.signal(),
            stats: state.stats.clone(),
            snapshot: state.snapshot_provider.clone(),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.registration.id()
    }

    /// Run until the client disconnects, a write fails or the server shuts down
    pub async fn run(self, frames: mpsc::Sender<StreamFrame>) {
        let StreamSession {
            registration,
            mut deliveries,
            mut bridge,
            opened_at,
            topic,
            config,
            mut shutdown,
            stats,
            snapshot,
        } = self;
        let handle = registration.handle().clone();
        let connection_id = handle.id;
        let write_timeout = config.write_timeout();

        if let Some(provider) = snapshot {
            if let Some(raw) = provider.snapshot().await {
                match payload::reencode(&raw) {
                    Ok(json) => {
                        if let Err(e) = write(&frames, StreamFrame::Data(json), write_timeout).await {
                            tracing::debug!(connection_id = %connection_id, error = %e, "Initial snapshot not sent");
                            return;
                        }
                        handle.update_activity();
                        stats.message_sent(Protocol::Sse);
                        MessageMetrics::record_sent(Protocol::Sse);
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "Invalid snapshot skipped");
                    }
                }
            }
        }

        let period = config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(opened_at + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break "server shutdown",

                _ = frames.closed() => break "client disconnected",

                Some(delivery) = deliveries.recv() => {
                    let json = match payload::reencode(&delivery.payload) {
                        Ok(json) => json,
                        Err(e) => {
                            BusMetrics::record_payload_decode_failure();
                            tracing::warn!(
                                connection_id = %connection_id,
                                topic = %delivery.topic,
                                error = %e,
                                "Dropping malformed payload"
                            );
                            continue;
                        }
                    };

                    if let Err(e) = write(&frames, StreamFrame::Data(json), write_timeout).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "SSE write failed");
                        break "write failed";
                    }
                    handle.update_activity();
                    stats.message_sent(Protocol::Sse);
                    MessageMetrics::record_sent(Protocol::Sse);
                    // Only real data pushes the next heartbeat back
                    heartbeat.reset();
                }

                raw = bridge.recv() => {
                    stats.bus_message_received();
                    BusMetrics::record_received();
                    if handle.offer(Delivery { topic: topic.clone(), payload: raw }).await == OfferOutcome::Full {
                        tracing::warn!(connection_id = %connection_id, "SSE delivery queue full, bus message dropped");
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = write(&frames, StreamFrame::Heartbeat, write_timeout).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "SSE heartbeat failed");
                        break "write failed";
                    }
                    handle.update_activity();
                    MessageMetrics::record_keepalive(Protocol::Sse);
                }
            }
        };

        tracing::info!(
            connection_id = %connection_id,
            reason = reason,
            "SSE connection closed"
        );
        // Bus subscription first, then the registry entry
        drop(bridge);
        drop(registration);
    }
}

async fn write(
    frames: &mpsc::Sender<StreamFrame>,
    frame: StreamFrame,
    limit: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(limit, frames.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(TransportError::Closed("response stream dropped".to_string())),
        Err(_) => Err(TransportError::TimedOut(limit)),
    }
}
