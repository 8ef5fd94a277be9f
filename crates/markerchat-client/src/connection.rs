//! Connection manager: one logical session channel over WebSocket.
//!
//! A single task owns the transport. It connects, classifies every inbound
//! text frame into a [`Message`], and reports lifecycle changes on an ordered
//! event stream. When a connection ends for any reason it waits a fixed delay
//! and opens a brand-new connection to the same URL, forever, until the
//! cancellation token fires.
//!
//! ```text
//! Connecting --handshake ok--> Open --error/close--> Closed
//!     ^                                                |
//!     +------------- Reconnecting (after delay) <------+
//! ```
//!
//! Nothing is buffered across a reconnect: outbound messages still queued
//! when a connection closes are discarded.

use std::sync::Once;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use markerchat_core::endpoint::Endpoint;
use markerchat_core::message::Message;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

/// Fixed delay between a close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Capacity of the inbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

static CRYPTO_PROVIDER: Once = Once::new();

/// `wss://` handshakes need a process-wide rustls provider.
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Snapshot published by the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Number of reconnect attempts made so far.
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server sent a close frame.
    Closed { code: u16, reason: String },
    /// The stream ended without a close frame.
    Dropped,
    /// Handshake or mid-stream transport failure.
    Failed(String),
}

impl CloseReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseReason::Closed { .. })
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Closed { code, reason } if reason.is_empty() => write!(f, "closed by server, code {code}"),
            CloseReason::Closed { code, reason } => write!(f, "closed by server, code {code}: {reason}"),
            CloseReason::Dropped => f.write_str("connection dropped"),
            CloseReason::Failed(detail) => write!(f, "connection failed: {detail}"),
        }
    }
}

/// Classified event, delivered in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    MessageReceived(Message),
    Closed(CloseReason),
    Error(String),
    /// The reconnect delay elapsed and a new connection is being opened.
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Sending half held by the role driver.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    status: watch::Receiver<ConnectionStatus>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Serialize and queue `message` on the open connection.
    ///
    /// Returns `false`, after logging, when the connection is not open or the
    /// message cannot be encoded. Never returns an error to the caller.
    pub fn send(&self, message: &Message) -> bool {
        let state = self.state();
        if state != ConnectionState::Open {
            tracing::warn!(?state, tag = %message.tag(), "send dropped: connection not open");
            return false;
        }
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tag = %message.tag(), error = %e, "send dropped: encode failed");
                return false;
            }
        };
        if self.outbound.send(text).is_err() {
            tracing::warn!(tag = %message.tag(), "send dropped: connection task has stopped");
            return false;
        }
        true
    }
}

/// Ordered, non-restartable stream of [`ConnectionEvent`]s.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<ConnectionEvent>,
}

impl EventStream {
    /// Next event, or `None` once the connection task has stopped.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = ConnectionEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Start the connection task for `endpoint`. Must be called inside a tokio
    /// runtime. The task runs until `cancel` fires or the event stream is
    /// dropped.
    pub fn open(
        endpoint: &Endpoint,
        config: ConnectionConfig,
        cancel: CancellationToken,
    ) -> (ConnectionHandle, EventStream) {
        Self::open_url(endpoint.ws_url(), config, cancel)
    }

    /// Same as [`ConnectionManager::open`] with an already built URL.
    pub fn open_url(
        url: String,
        config: ConnectionConfig,
        cancel: CancellationToken,
    ) -> (ConnectionHandle, EventStream) {
        install_crypto_provider();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus {
            state: ConnectionState::Connecting,
            retry_count: 0,
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let worker = Worker {
            url,
            config,
            cancel,
            sink: EventSink {
                events: event_tx,
                status: status_tx,
            },
            outbound: outbound_rx,
        };
        tokio::spawn(worker.run());

        (
            ConnectionHandle {
                status: status_rx,
                outbound: outbound_tx,
            },
            EventStream { rx: event_rx },
        )
    }
}

/// Event and status publishing, split from the outbound receiver so both can
/// be borrowed inside one `select!`.
struct EventSink {
    events: mpsc::Sender<ConnectionEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl EventSink {
    /// Returns `false` once nobody is listening.
    async fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn set_retry_count(&self, retry_count: u32) {
        self.status.send_modify(|s| s.retry_count = retry_count);
    }
}

struct Worker {
    url: String,
    config: ConnectionConfig,
    cancel: CancellationToken,
    sink: EventSink,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Worker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.sink.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.url, attempt, "connecting");

            let reason = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(url = %self.url, "connection: cancellation requested, shutting down");
                    break;
                }
                reason = connect_and_pump(&self.url, &self.sink, &mut self.outbound) => reason,
            };

            self.sink.set_state(ConnectionState::Closed);
            self.discard_outbound();
            if reason.is_clean() {
                tracing::info!(url = %self.url, %reason, "connection closed");
            } else {
                tracing::warn!(url = %self.url, %reason, "connection lost");
            }
            if !self.sink.emit(ConnectionEvent::Closed(reason)).await {
                tracing::debug!("event stream dropped, stopping connection task");
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("connection: cancellation during reconnect delay");
                    break;
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }

            attempt = attempt.saturating_add(1);
            self.sink.set_retry_count(attempt);
            self.sink.set_state(ConnectionState::Connecting);
            tracing::info!(
                url = %self.url,
                attempt,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "reconnecting..."
            );
            if !self.sink.emit(ConnectionEvent::Reconnecting { attempt }).await {
                break;
            }
        }

        self.sink.set_state(ConnectionState::Closed);
    }

    /// Drop anything queued for the connection that just closed.
    fn discard_outbound(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "discarded outbound messages queued on a closed connection");
        }
    }
}

/// One connection attempt: handshake, then relay frames until the connection
/// ends. Returns why it ended.
async fn connect_and_pump(
    url: &str,
    sink: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> CloseReason {
    let ws = match tokio_tungstenite::connect_async(url).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let detail = e.to_string();
            tracing::warn!(url = %url, error = %detail, "handshake failed");
            sink.emit(ConnectionEvent::Error(detail.clone())).await;
            return CloseReason::Failed(detail);
        }
    };

    sink.set_state(ConnectionState::Open);
    tracing::info!(url = %url, "connection open");
    if !sink.emit(ConnectionEvent::Opened).await {
        return CloseReason::Dropped;
    }

    let (mut write, mut read) = ws.split();
    let mut outbound_open = true;

    loop {
        // Inbound first: a close already on the wire wins over queued sends.
        tokio::select! {
            biased;
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        tracing::debug!(len = text.len(), "frame received");
                        let message = classify_frame(&text);
                        if !sink.emit(ConnectionEvent::MessageReceived(message)).await {
                            return CloseReason::Dropped;
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let message = match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => classify_frame(&text),
                            Err(_) => {
                                tracing::warn!(len = bytes.len(), "non-UTF-8 binary frame");
                                Message::malformed()
                            }
                        };
                        if !sink.emit(ConnectionEvent::MessageReceived(message)).await {
                            return CloseReason::Dropped;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return match frame {
                            Some(frame) => CloseReason::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.into_owned(),
                            },
                            None => CloseReason::Closed {
                                code: 1005,
                                reason: String::new(),
                            },
                        };
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let detail = e.to_string();
                        sink.emit(ConnectionEvent::Error(detail.clone())).await;
                        return CloseReason::Failed(detail);
                    }
                    None => return CloseReason::Dropped,
                }
            }
            text = outbound.recv(), if outbound_open => {
                match text {
                    Some(text) => {
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            let detail = e.to_string();
                            sink.emit(ConnectionEvent::Error(detail.clone())).await;
                            return CloseReason::Failed(detail);
                        }
                    }
                    // Every handle is gone; keep receiving.
                    None => outbound_open = false,
                }
            }
        }
    }
}

/// Classify one inbound text frame, downgrading malformed payloads.
fn classify_frame(text: &str) -> Message {
    match Message::classify(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "malformed inbound message");
            Message::malformed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_display() {
        assert_eq!(
            CloseReason::Closed {
                code: 1000,
                reason: String::new(),
            }
            .to_string(),
            "closed by server, code 1000"
        );
        assert_eq!(
            CloseReason::Closed {
                code: 1001,
                reason: "going away".into(),
            }
            .to_string(),
            "closed by server, code 1001: going away"
        );
        assert_eq!(CloseReason::Dropped.to_string(), "connection dropped");
        assert!(CloseReason::Failed("refused".into()).to_string().contains("refused"));
    }

    #[test]
    fn only_server_close_is_clean() {
        assert!(
            CloseReason::Closed {
                code: 1000,
                reason: String::new(),
            }
            .is_clean()
        );
        assert!(!CloseReason::Dropped.is_clean());
        assert!(!CloseReason::Failed("x".into()).is_clean());
    }

    #[test]
    fn classify_frame_downgrades_garbage() {
        assert_eq!(classify_frame("{{{"), Message::malformed());
        assert_eq!(
            classify_frame(r#"{"type":"system","content":"hi"}"#),
            Message::System { content: "hi".into() }
        );
    }

    #[tokio::test]
    async fn send_before_open_is_dropped() {
        // Nothing listens on port 9; the handle starts out Connecting.
        let cancel = CancellationToken::new();
        let (handle, _events) = ConnectionManager::open_url(
            "ws://127.0.0.1:9/ws".into(),
            ConnectionConfig::default(),
            cancel.clone(),
        );
        assert_ne!(handle.state(), ConnectionState::Open);
        assert!(!handle.send(&Message::system_notification("x")));
        cancel.cancel();
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cancel = CancellationToken::new();
        let (_handle, mut events) = ConnectionManager::open_url(
            format!("ws://127.0.0.1:{port}/ws"),
            ConnectionConfig {
                reconnect_delay: Duration::from_millis(20),
            },
            cancel.clone(),
        );

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert!(matches!(first, ConnectionEvent::Error(_)), "got {first:?}");
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert!(matches!(second, ConnectionEvent::Closed(CloseReason::Failed(_))), "got {second:?}");
        let third = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(third, ConnectionEvent::Reconnecting { attempt: 1 });
        cancel.cancel();
    }

    #[tokio::test]
    async fn secure_endpoint_attempts_a_tls_handshake() {
        // A plain TCP peer that hangs up: the TLS handshake itself must fail.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let cancel = CancellationToken::new();
        let (_handle, mut events) = ConnectionManager::open_url(
            format!("wss://127.0.0.1:{port}/ws"),
            ConnectionConfig {
                reconnect_delay: Duration::from_secs(60),
            },
            cancel.clone(),
        );

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("stream ended");
        match first {
            ConnectionEvent::Error(detail) => {
                assert!(!detail.contains("not compiled in"), "TLS missing: {detail}");
            }
            other => panic!("expected a handshake error, got {other:?}"),
        }
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert!(matches!(second, ConnectionEvent::Closed(CloseReason::Failed(_))), "got {second:?}");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }
}
