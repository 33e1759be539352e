#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_stream::{stream, try_stream};
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::config::{Config, LinearBackoff};
use super::error::WsError;
use super::traits::MessageParser;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broadcast channel capacity for connection events.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting {
        /// Reconnection attempt number, `0` for an explicit `connect`
        attempt: u32,
    },
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// No live connection
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Why a connection went away.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by [`ConnectionManager::disconnect`]
    Disconnected,
    /// The server closed the connection
    Remote {
        /// Close code sent by the server, if any
        code: Option<u16>,
        /// Close reason sent by the server
        reason: String,
    },
    /// A transport error ended the connection
    Transport,
}

/// Everything a subscriber can observe about a connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ConnectionEvent<M> {
    /// A parsed inbound message
    Message(M),
    /// A transport error or an exhausted reconnection budget
    Error(Arc<WsError>),
    /// The connection closed
    Closed(CloseReason),
}

/// How a single connection session ended.
enum SessionEnd {
    Disconnected,
    Remote { code: Option<u16>, reason: String },
    Failed(tungstenite::Error),
}

/// Result of checking whether `connect` may start a new attempt.
enum Admission {
    Start(CancellationToken),
    AlreadyOpen,
    InFlight,
}

/// Manages WebSocket connection lifecycle, reconnection, and event fan-out.
///
/// - Explicit [`connect`](Self::connect) with a bounded handshake timeout
/// - Automatic reconnection with linearly increasing delay after unintended closes
/// - Broadcasting messages, errors and closes to any number of subscribers
///
/// Subscribers can be registered at any time, including before the first
/// connection, and keep receiving across reconnects. Dropping the last handle
/// stops the background task.
///
/// # Type Parameters
///
/// - `M`: Message type that implements [`DeserializeOwned`] among other "helper" types
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(Config::default(), JsonParser::<Value>::new())?;
/// let mut messages = Box::pin(connection.messages());
///
/// connection.connect().await?;
/// connection.send(&json!({ "query": "salinity near Chennai" }))?;
///
/// while let Some(message) = messages.next().await {
///     println!("Received: {:?}", message?);
/// }
/// ```
pub struct ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    inner: Arc<Inner<M, P>>,
    /// Cancels every session once the last handle is dropped
    lifetime: Arc<DropGuard>,
}

impl<M, P> Clone for ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lifetime: Arc::clone(&self.lifetime),
        }
    }
}

struct Inner<M, P> {
    config: Config,
    parser: P,
    /// Watch channel sender for state changes; every transition goes through it
    state_tx: watch::Sender<ConnectionState>,
    /// Broadcast sender for connection events
    events_tx: broadcast::Sender<ConnectionEvent<M>>,
    /// Sender for the live connection's outgoing frames
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Token of the current session
    session: Mutex<CancellationToken>,
    /// Parent of every session token
    root: CancellationToken,
}

impl<M, P> ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Create a new connection manager in the [`ConnectionState::Closed`] state.
    ///
    /// No I/O happens until [`connect`](Self::connect) is called.
    pub fn new(config: Config, parser: P) -> Result<Self> {
        config.endpoint_url()?;

        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let root = CancellationToken::new();
        let session = root.child_token();
        let lifetime = root.clone().drop_guard();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                parser,
                state_tx,
                events_tx,
                outbound: Mutex::new(None),
                session: Mutex::new(session),
                root,
            }),
            lifetime: Arc::new(lifetime),
        })
    }

    /// Open the connection.
    ///
    /// Resolves once the handshake completes. Fails with [`WsError::Timeout`] when the
    /// handshake takes longer than [`Config::connect_timeout`], [`WsError::Refused`] when
    /// the transport fails, [`WsError::AttemptInFlight`] when another attempt is running
    /// and [`WsError::Aborted`] when [`disconnect`](Self::disconnect) is called meanwhile.
    /// Returns `Ok(())` immediately if already connected.
    ///
    /// A `Timeout` or `Refused` failure is also published to subscribers, and the manager
    /// keeps retrying in the background with the usual reconnection schedule.
    pub async fn connect(&self) -> Result<()> {
        let mut admission = Admission::AlreadyOpen;
        self.inner.state_tx.send_if_modified(|state| match *state {
            ConnectionState::Closed => {
                admission = Admission::Start(self.inner.begin_session());
                *state = ConnectionState::Connecting { attempt: 0 };
                true
            }
            ConnectionState::Open { .. } => false,
            ConnectionState::Connecting { .. } => {
                admission = Admission::InFlight;
                false
            }
        });

        let token = match admission {
            Admission::Start(token) => token,
            Admission::AlreadyOpen => return Ok(()),
            Admission::InFlight => return Err(WsError::AttemptInFlight.into()),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.inner.config.endpoint, "Connecting to WebSocket");

        match self.inner.open(&token).await {
            Ok(ws_stream) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                if !self.inner.establish(&token, outbound_tx) {
                    return Err(WsError::Aborted.into());
                }

                #[cfg(feature = "tracing")]
                tracing::info!(endpoint = %self.inner.config.endpoint, "Connected to WebSocket");

                tokio::spawn(Inner::drive(
                    Arc::clone(&self.inner),
                    ws_stream,
                    outbound_rx,
                    token,
                ));
                Ok(())
            }
            Err(WsError::Aborted) => Err(WsError::Aborted.into()),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %self.inner.config.endpoint, error = %e, "Unable to connect");
                let e = Arc::new(e);
                if self.inner.transition(&token, ConnectionState::Closed) {
                    self.inner.publish(ConnectionEvent::Error(Arc::clone(&e)));
                    tokio::spawn(Inner::recover(Arc::clone(&self.inner), token));
                }
                Err(e.into())
            }
        }
    }

    /// Serialize `request` to JSON and send it as one text frame.
    ///
    /// Fails with [`WsError::NotConnected`] unless the connection is open; nothing is
    /// queued in that case.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected.into());
        }
        let json = serde_json::to_string(request)?;
        self.send_text(json)
    }

    /// Send a pre-serialized text frame.
    pub fn send_text<S: Into<String>>(&self, text: S) -> Result<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected.into());
        }

        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = outbound.as_ref() else {
            return Err(WsError::NotConnected.into());
        };

        let text = text.into();
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending WebSocket text message");

        sender
            .send(text)
            .map_err(|_e| WsError::NotConnected)?;
        Ok(())
    }

    /// Close the connection and cancel any pending reconnection.
    ///
    /// Idempotent. The manager stays usable: a later [`connect`](Self::connect) opens a
    /// fresh connection.
    pub fn disconnect(&self) {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let changed = self.inner.state_tx.send_if_modified(|state| {
            *self
                .inner
                .outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });

        #[cfg(feature = "tracing")]
        if changed {
            tracing::info!(endpoint = %self.inner.config.endpoint, "Disconnected from WebSocket");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = changed;
    }

    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// Subscribe to every connection event.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive events concurrently without blocking each other.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent<M>> {
        self.inner.events_tx.subscribe()
    }

    /// Stream of parsed inbound messages.
    ///
    /// Yields [`WsError::Lagged`] when the subscriber falls behind and ends when the
    /// manager is gone.
    pub fn messages(&self) -> impl Stream<Item = Result<M>> + use<M, P> {
        let mut rx = self.events();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(ConnectionEvent::Message(message)) => {
                        yield message;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message subscription lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream of transport errors and reconnection failures.
    pub fn errors(&self) -> impl Stream<Item = Arc<WsError>> + use<M, P> {
        let mut rx = self.events();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(ConnectionEvent::Error(error)) => {
                        yield error;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream of close notifications.
    pub fn closes(&self) -> impl Stream<Item = CloseReason> + use<M, P> {
        let mut rx = self.events();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(ConnectionEvent::Closed(reason)) => {
                        yield reason;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl<M, P> Inner<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Cancel the previous session, which may still be waiting to reconnect, and start a new one.
    fn begin_session(&self) -> CancellationToken {
        let token = self.root.child_token();
        let previous = std::mem::replace(
            &mut *self.session.lock().unwrap_or_else(PoisonError::into_inner),
            token.clone(),
        );
        previous.cancel();
        token
    }

    /// Apply `next` unless the session was cancelled. Leaving the open state drops the
    /// outbound sender so queued frames die with the connection.
    fn transition(&self, token: &CancellationToken, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            if !next.is_connected() {
                *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
            *state = next;
            true
        })
    }

    /// Install the outbound sender and move to the open state in one step.
    fn establish(&self, token: &CancellationToken, sender: mpsc::UnboundedSender<String>) -> bool {
        self.state_tx.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
            *state = ConnectionState::Open {
                since: Instant::now(),
            };
            true
        })
    }

    fn publish(&self, event: ConnectionEvent<M>) {
        // No subscribers is fine
        _ = self.events_tx.send(event);
    }

    /// Perform the handshake, bounded by the connect timeout and the session token.
    async fn open(&self, token: &CancellationToken) -> std::result::Result<WsStream, WsError> {
        let handshake = timeout(
            self.config.connect_timeout,
            connect_async(self.config.endpoint.as_str()),
        );

        tokio::select! {
            biased;
            () = token.cancelled() => Err(WsError::Aborted),
            result = handshake => match result {
                Ok(Ok((ws_stream, _))) => Ok(ws_stream),
                Ok(Err(e)) => Err(WsError::Refused(e)),
                Err(_) => Err(WsError::Timeout(self.config.connect_timeout)),
            },
        }
    }

    /// Own the connection until it is disconnected or the reconnection budget runs out.
    async fn drive(
        self: Arc<Self>,
        mut ws_stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        token: CancellationToken,
    ) {
        loop {
            let (reason, failure) = match self.pump(ws_stream, &mut outbound_rx, &token).await {
                SessionEnd::Disconnected => {
                    self.publish(ConnectionEvent::Closed(CloseReason::Disconnected));
                    return;
                }
                SessionEnd::Remote { code, reason } => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(?code, %reason, "WebSocket closed by server");
                    (CloseReason::Remote { code, reason }, None)
                }
                SessionEnd::Failed(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "WebSocket connection failed");
                    (CloseReason::Transport, Some(e))
                }
            };

            if !self.transition(&token, ConnectionState::Closed) {
                // Cancelled meanwhile; every session still reports exactly one close
                self.publish(ConnectionEvent::Closed(CloseReason::Disconnected));
                return;
            }
            if let Some(e) = failure {
                self.publish(ConnectionEvent::Error(Arc::new(WsError::Connection(e))));
            }
            self.publish(ConnectionEvent::Closed(reason));

            match self.reconnect(&token).await {
                Some((next_stream, next_rx)) => {
                    ws_stream = next_stream;
                    outbound_rx = next_rx;
                }
                None => return,
            }
        }
    }

    /// Keep retrying after a failed explicit `connect`, then own the connection if one opens.
    async fn recover(self: Arc<Self>, token: CancellationToken) {
        if let Some((ws_stream, outbound_rx)) = self.reconnect(&token).await {
            self.drive(ws_stream, outbound_rx, token).await;
        }
    }

    /// Handle an active WebSocket connection.
    async fn pump(
        &self,
        ws_stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        token: &CancellationToken,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Disconnected;
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        self.dispatch(text.as_bytes());
                    }
                    Some(Ok(Message::Close(close))) => {
                        return SessionEnd::Remote {
                            code: close.as_ref().map(|frame| u16::from(frame.code)),
                            reason: close
                                .map(|frame| frame.reason.as_str().to_owned())
                                .unwrap_or_default(),
                        };
                    }
                    Some(Ok(_)) => {
                        // Binary frames and control frames carry nothing for subscribers.
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => {
                        return SessionEnd::Remote {
                            code: None,
                            reason: String::new(),
                        };
                    }
                },

                outgoing = outbound_rx.recv() => match outgoing {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                    None => {
                        // The sender is only dropped by `disconnect`
                        _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Disconnected;
                    }
                },
            }
        }
    }

    /// Parse one text frame and publish its messages. Malformed frames are dropped.
    fn dispatch(&self, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Ok(messages) => {
                for message in messages {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "Parsed WebSocket message");
                    self.publish(ConnectionEvent::Message(message));
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    text = %String::from_utf8_lossy(bytes),
                    error = %e,
                    "Failed to parse WebSocket message"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Retry with linearly increasing delay. Returns the new connection, or `None` when
    /// cancelled or out of attempts.
    async fn reconnect(
        &self,
        token: &CancellationToken,
    ) -> Option<(WsStream, mpsc::UnboundedReceiver<String>)> {
        let mut backoff: LinearBackoff = self.config.reconnect.clone().into();

        while let Some(delay) = backoff.next_backoff() {
            let attempt = backoff.attempt();
            #[cfg(feature = "tracing")]
            tracing::info!(
                attempt,
                max_attempts = ?self.config.reconnect.max_attempts,
                ?delay,
                "Attempting to reconnect"
            );

            tokio::select! {
                biased;
                () = token.cancelled() => return None,
                () = sleep(delay) => {}
            }

            if !self.transition(token, ConnectionState::Connecting { attempt }) {
                return None;
            }

            match self.open(token).await {
                Ok(ws_stream) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    if !self.establish(token, outbound_tx) {
                        return None;
                    }
                    #[cfg(feature = "tracing")]
                    tracing::info!(attempt, "Reconnected to WebSocket");
                    return Some((ws_stream, outbound_rx));
                }
                Err(WsError::Aborted) => return None,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %e, "Reconnection failed");
                    if !self.transition(token, ConnectionState::Closed) {
                        return None;
                    }
                    self.publish(ConnectionEvent::Error(Arc::new(e)));
                }
            }
        }

        if token.is_cancelled() {
            return None;
        }

        let attempts = backoff.attempt();
        #[cfg(feature = "tracing")]
        tracing::error!(attempts, "Max reconnection attempts reached");
        self.publish(ConnectionEvent::Error(Arc::new(WsError::MaxRetriesExceeded {
            attempts,
        })));
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::ws::traits::JsonParser;

    fn manager(endpoint: &str) -> ConnectionManager<Value, JsonParser<Value>> {
        let config = Config::builder().endpoint(endpoint).build();
        ConnectionManager::new(config, JsonParser::new()).unwrap()
    }

    #[tokio::test]
    async fn starts_closed() {
        let connection = manager("ws://127.0.0.1:9/ws");

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.is_connected());
        assert_eq!(connection.endpoint(), "ws://127.0.0.1:9/ws");
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let connection = manager("ws://127.0.0.1:9/ws");

        let error = connection.send(&serde_json::json!({"query": "x"})).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let connection = manager("ws://127.0.0.1:9/ws");

        connection.disconnect();
        connection.disconnect();

        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let config = Config::builder().endpoint("ftp://example.com").build();

        let result = ConnectionManager::new(config, JsonParser::<Value>::new());
        assert!(result.is_err(), "ftp endpoint should be rejected");
    }

    #[test]
    fn only_open_counts_as_connected() {
        assert!(
            ConnectionState::Open {
                since: Instant::now()
            }
            .is_connected()
        );
        assert!(!ConnectionState::Connecting { attempt: 0 }.is_connected());
        assert!(!ConnectionState::Closed.is_connected());
    }
}
