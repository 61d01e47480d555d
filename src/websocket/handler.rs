use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::UpstreamBridge;
use crate::config::WebSocketConfig;
use crate::connection_manager::{
    ConnectionHandle, Delivery, OfferOutcome, Protocol, Registration, ServerStats,
};
use crate::error::TransportError;
use crate::metrics::{BusMetrics, MessageMetrics};
use crate::server::AppState;
use crate::shutdown::ShutdownSignal;

use super::message::{data_frame, ChannelIdentifier, ClientCommand, ControlFrame};
use super::topics::TopicMap;

/// Subprotocol offered by Action Cable clients
const CABLE_PROTOCOL: &str = "actioncable-v1-json";

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.protocols([CABLE_PROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = FramedSession::open(&state).await;
    tracing::info!(connection_id = %session.id(), "WebSocket connection established");

    let (sink, stream) = socket.split();
    session.run(sink, stream).await;
}

/// A registered WebSocket connection and everything its event loop owns.
///
/// Two tasks serve each connection: a reader that decodes control frames and
/// updates the subscription set, and the event loop, which is the only
/// writer to the socket.
pub struct FramedSession {
    registration: Registration,
    deliveries: mpsc::Receiver<Delivery>,
    bridge: UpstreamBridge,
    /// Keepalives are scheduled from here, not from when the loop starts
    opened_at: Instant,
    topic: Arc<str>,
    topics: Arc<TopicMap>,
    config: WebSocketConfig,
    shutdown: ShutdownSignal,
    stats: Arc<ServerStats>,
}

impl FramedSession {
    /// Register a connection with no subscriptions and subscribe it to the bus
    pub async fn open(state: &AppState) -> Self {
        let config = state.settings.websocket.clone();
        let channel = state.settings.bus.channel.as_str();

        let (tx, deliveries) = mpsc::channel(config.delivery_buffer_size);
        let registration =
            state
                .connection_manager
                .register(Protocol::WebSocket, Vec::new(), tx);
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
            topics: state.topics.clone(),
            config,
            shutdown: state.shutdown.signal(),
            stats: state.stats.clone(),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.registration.id()
    }

    /// Run until the peer closes, a write fails or the server shuts down
    pub async fn run<S, R, E>(self, mut sink: S, stream: R)
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let FramedSession {
            registration,
            mut deliveries,
            mut bridge,
            opened_at,
            topic,
            topics,
            config,
            mut shutdown,
            stats,
        } = self;
        let handle = registration.handle().clone();
        let connection_id = handle.id;
        let write_timeout = config.write_timeout();

        if let Err(e) = send_control(&mut sink, &ControlFrame::Welcome, write_timeout).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Welcome not sent");
            return;
        }
        handle.update_activity();

        let (reply_tx, mut replies) = mpsc::channel(config.inbound_buffer_size);
        let mut reader = tokio::spawn(read_loop(stream, handle.clone(), topics.clone(), reply_tx));

        let period = config.ping_interval();
        let mut ping = tokio::time::interval_at(opened_at + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break "server shutdown",

                _ = &mut reader => break "reader finished",

                Some(reply) = replies.recv() => {
                    if let Err(e) = send_control(&mut sink, &reply, write_timeout).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket write failed");
                        break "write failed";
                    }
                    handle.update_activity();
                }

                Some(delivery) = deliveries.recv() => {
                    // Queued before an unsubscribe was processed
                    if !handle.is_subscribed(&delivery.topic).await {
                        tracing::debug!(
                            connection_id = %connection_id,
                            topic = %delivery.topic,
                            "Discarding delivery for unsubscribed topic"
                        );
                        continue;
                    }

                    let identifier = topics.identifier_for(&delivery.topic);
                    let text = match data_frame(&identifier, &delivery.payload) {
                        Ok(text) => text,
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

                    if let Err(e) = send_text(&mut sink, text, write_timeout).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket write failed");
                        break "write failed";
                    }
                    handle.update_activity();
                    stats.message_sent(Protocol::WebSocket);
                    MessageMetrics::record_sent(Protocol::WebSocket);
                }

                raw = bridge.recv() => {
                    stats.bus_message_received();
                    BusMetrics::record_received();
                    if handle.offer(Delivery { topic: topic.clone(), payload: raw }).await == OfferOutcome::Full {
                        tracing::warn!(connection_id = %connection_id, "WebSocket delivery queue full, bus message dropped");
                    }
                }

                _ = ping.tick() => {
                    if let Err(e) = send_control(&mut sink, &ControlFrame::Ping, write_timeout).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket ping failed");
                        break "write failed";
                    }
                    handle.update_activity();
                    MessageMetrics::record_keepalive(Protocol::WebSocket);
                }
            }
        };

        reader.abort();
        // Sends a close frame when the peer is still there
        let _ = tokio::time::timeout(write_timeout, sink.close()).await;

        tracing::info!(
            connection_id = %connection_id,
            reason = reason,
            "WebSocket connection closed"
        );
        drop(bridge);
        drop(registration);
    }
}

/// Read inbound frames until the peer closes or the stream fails
async fn read_loop<R, E>(
    mut stream: R,
    handle: Arc<ConnectionHandle>,
    topics: Arc<TopicMap>,
    replies: mpsc::Sender<ControlFrame>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle.update_activity();
                if let Some(reply) = process_command(text.as_str(), &handle, &topics).await {
                    if replies.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                handle.update_activity();
                tracing::debug!(connection_id = %handle.id, "Ignoring binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                handle.update_activity();
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(connection_id = %handle.id, "Received close frame");
                break;
            }
            Err(e) => {
                tracing::debug!(connection_id = %handle.id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Apply one control frame. Returns the reply to send, if any.
async fn process_command(
    text: &str,
    handle: &ConnectionHandle,
    topics: &TopicMap,
) -> Option<ControlFrame> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            BusMetrics::record_frame_decode_failure();
            tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client frame");
            return None;
        }
    };
    MessageMetrics::record_control(command.name());

    match command {
        ClientCommand::Subscribe { identifier } => {
            let channel = parse_channel(handle, &identifier)?;
            let topic = topics.topic_for(&channel);
            handle.subscribe(topic).await;

            tracing::info!(
                connection_id = %handle.id,
                channel = %channel,
                topic = %topic,
                "Subscribed to channel"
            );
            Some(ControlFrame::ConfirmSubscription { identifier })
        }
        ClientCommand::Unsubscribe { identifier } => {
            let channel = parse_channel(handle, &identifier)?;
            let topic = topics.topic_for(&channel);
            let was_subscribed = handle.unsubscribe(topic).await;

            tracing::debug!(
                connection_id = %handle.id,
                channel = %channel,
                topic = %topic,
                was_subscribed = was_subscribed,
                "Unsubscribed from channel"
            );
            None
        }
        ClientCommand::Unknown => {
            tracing::warn!(connection_id = %handle.id, frame = %text, "Unknown WebSocket command");
            None
        }
    }
}

fn parse_channel(handle: &ConnectionHandle, identifier: &str) -> Option<String> {
    match ChannelIdentifier::parse(identifier) {
        Ok(parsed) => Some(parsed.channel),
        Err(e) => {
            BusMetrics::record_frame_decode_failure();
            tracing::warn!(
                connection_id = %handle.id,
                identifier = %identifier,
                error = %e,
                "Invalid channel identifier"
            );
            None
        }
    }
}

async fn send_control<S>(
    sink: &mut S,
    frame: &ControlFrame,
    limit: Duration,
) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = frame
        .to_json()
        .map_err(|e| TransportError::Closed(e.to_string()))?;
    send_text(sink, text, limit).await
}

async fn send_text<S>(sink: &mut S, text: String, limit: Duration) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Closed(e.to_string())),
        Err(_) => Err(TransportError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::HangingBus;
    use crate::bus::{MemoryBus, Payload, UpstreamBus};
    use crate::config::Settings;
    use futures::channel::mpsc as fmpsc;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    const IDENTIFIER: &str = r#"{"channel":"DashboardUpdatesChannel"}"#;
    const VALID: &str = r#"{"timestamp":"12:00:00"}"#;

    type Inbound = fmpsc::UnboundedSender<Result<Message, axum::Error>>;
    type Outbound = fmpsc::Receiver<Message>;

    fn state_with_bus() -> (AppState, Arc<MemoryBus>) {
        let memory = Arc::new(MemoryBus::new());
        let bus: Arc<dyn UpstreamBus> = memory.clone();
        (AppState::new(Settings::default(), Some(bus)), memory)
    }

    async fn connect(state: &AppState) -> (Inbound, Outbound, tokio::task::JoinHandle<()>) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::channel(16);
        let session = FramedSession::open(state).await;
        let task = tokio::spawn(session.run(out_tx, in_rx));
        (in_tx, out_rx, task)
    }

    /// Takes `remaining` frames, then stops accepting writes for good
    struct StallingSink {
        remaining: usize,
    }

    impl Sink<Message> for StallingSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            if self.remaining > 0 {
                Poll::Ready(Ok(()))
            } else {
                Poll::Pending
            }
        }

        fn start_send(mut self: Pin<&mut Self>, _item: Message) -> Result<(), Infallible> {
            self.remaining -= 1;
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    fn command(name: &str) -> Result<Message, axum::Error> {
        let frame = serde_json::json!({ "command": name, "identifier": IDENTIFIER });
        Ok(Message::Text(frame.to_string().into()))
    }

    async fn next_text(out: &mut Outbound) -> String {
        match out.next().await {
            Some(Message::Text(text)) => text.as_str().to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_welcome_is_first_frame() {
        let (state, _bus) = state_with_bus();
        let (_in, mut out, _task) = connect(&state).await;
        assert_eq!(next_text(&mut out).await, r#"{"type":"welcome"}"#);
    }

    #[tokio::test]
    async fn test_subscribe_confirms_and_delivers() {
        let (state, bus) = state_with_bus();
        let (inbound, mut out, _task) = connect(&state).await;
        next_text(&mut out).await;

        inbound.unbounded_send(command("subscribe")).unwrap();
        assert_eq!(
            next_text(&mut out).await,
            r#"{"type":"confirm_subscription","identifier":"{\"channel\":\"DashboardUpdatesChannel\"}"}"#
        );

        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        assert_eq!(
            next_text(&mut out).await,
            r#"{"identifier":"{\"channel\":\"DashboardUpdatesChannel\"}","message":{"timestamp":"12:00:00"}}"#
        );
        assert_eq!(state.stats.snapshot().websocket.messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_without_subscription_and_after_unsubscribe() {
        let (state, bus) = state_with_bus();
        let (quiet_in, mut quiet_out, _quiet) = connect(&state).await;
        let (loud_in, mut loud_out, _loud) = connect(&state).await;
        next_text(&mut quiet_out).await;
        next_text(&mut loud_out).await;

        loud_in.unbounded_send(command("subscribe")).unwrap();
        next_text(&mut loud_out).await;

        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        assert!(next_text(&mut loud_out).await.contains("\"message\""));

        // Let the quiet connection process the same publish
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(quiet_out.try_next().is_err());

        quiet_in.unbounded_send(command("subscribe")).unwrap();
        assert!(next_text(&mut quiet_out).await.contains("confirm_subscription"));
        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        assert!(next_text(&mut quiet_out).await.contains("\"message\""));

        quiet_in.unbounded_send(command("unsubscribe")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(quiet_out.try_next().is_err());
        assert!(next_text(&mut loud_out).await.contains("\"message\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_without_subscription_is_harmless() {
        let (state, _bus) = state_with_bus();
        let (inbound, mut out, task) = connect(&state).await;
        next_text(&mut out).await;

        inbound.unbounded_send(command("unsubscribe")).unwrap();
        inbound
            .unbounded_send(Ok(Message::Text("{\"command\":\"dance\"}".into())))
            .unwrap();
        inbound
            .unbounded_send(Ok(Message::Text("garbage".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!task.is_finished());
        assert!(out.try_next().is_err());
        assert_eq!(state.connection_manager.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_every_interval() {
        let (state, _bus) = state_with_bus();
        let (_in, mut out, _task) = connect(&state).await;
        next_text(&mut out).await;
        let start = Instant::now();

        assert_eq!(next_text(&mut out).await, r#"{"type":"ping"}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(next_text(&mut out).await, r#"{"type":"ping"}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_close_frame_ends_session() {
        let (state, bus) = state_with_bus();
        let (inbound, mut out, task) = connect(&state).await;
        next_text(&mut out).await;

        inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        assert_eq!(state.connection_manager.count(), 0);
        assert_eq!(bus.subscriber_count("dashboard_updates"), 0);
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let (state, _bus) = state_with_bus();
        let (inbound, mut out, task) = connect(&state).await;
        next_text(&mut out).await;

        inbound
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();
        task.await.unwrap();
        assert_eq!(state.connection_manager.count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let (state, bus) = state_with_bus();
        let (inbound, mut out, task) = connect(&state).await;
        next_text(&mut out).await;
        inbound.unbounded_send(command("subscribe")).unwrap();
        next_text(&mut out).await;

        drop(out);
        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();

        task.await.unwrap();
        assert_eq!(state.connection_manager.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_session() {
        let (state, _bus) = state_with_bus();
        let (_in, mut out, task) = connect(&state).await;
        next_text(&mut out).await;

        state.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.connection_manager.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_delivery_dropped_after_unsubscribe() {
        let state = AppState::new(Settings::default(), None);
        let session = FramedSession::open(&state).await;
        let handle = state.connection_manager.get_connection(session.id()).unwrap();

        handle.subscribe("dashboard_updates").await;
        let result = state
            .dispatcher
            .broadcast("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await;
        assert_eq!(result.delivered, 1);
        handle.unsubscribe("dashboard_updates").await;

        let (_in, in_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        let (out_tx, mut out) = fmpsc::channel(16);
        let _task = tokio::spawn(session.run(out_tx, in_rx));

        assert_eq!(next_text(&mut out).await, r#"{"type":"welcome"}"#);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(out.try_next().is_err());
        assert_eq!(state.stats.snapshot().websocket.messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_does_not_hold_up_others() {
        let (state, bus) = state_with_bus();
        let (healthy_in, mut healthy_out, _healthy) = connect(&state).await;
        next_text(&mut healthy_out).await;
        healthy_in.unbounded_send(command("subscribe")).unwrap();
        next_text(&mut healthy_out).await;

        // Welcome and confirmation go through, nothing after that
        let (stalled_in, stalled_rx) = fmpsc::unbounded();
        let stalled = FramedSession::open(&state).await;
        let stalled = tokio::spawn(stalled.run(StallingSink { remaining: 2 }, stalled_rx));
        stalled_in.unbounded_send(command("subscribe")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.connection_manager.count(), 2);

        let start = Instant::now();
        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        assert!(next_text(&mut healthy_out).await.contains("\"message\""));
        assert!(start.elapsed() < Duration::from_secs(1));

        tokio::time::timeout(Duration::from_secs(11), stalled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.connection_manager.count(), 1);

        bus.publish("dashboard_updates", Payload::from(VALID.as_bytes()))
            .await
            .unwrap();
        assert!(next_text(&mut healthy_out).await.contains("\"message\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_bus_still_welcomes_and_pings() {
        let bus: Arc<dyn UpstreamBus> = Arc::new(HangingBus);
        let state = AppState::new(Settings::default(), Some(bus));
        let start = Instant::now();
        let (_in, mut out, _task) = connect(&state).await;

        assert_eq!(next_text(&mut out).await, r#"{"type":"welcome"}"#);
        assert_eq!(start.elapsed(), state.settings.bus.subscribe_timeout());
        assert_eq!(state.connection_manager.count(), 1);

        assert_eq!(next_text(&mut out).await, r#"{"type":"ping"}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }
}
