use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use super::types::request::Query;
use super::types::response::{ChatMessage, parse_messages};
use crate::Result;
use crate::error::Error;
use crate::ws::config::Config;
use crate::ws::connection::{CloseReason, ConnectionEvent, ConnectionState};
use crate::ws::{ConnectionManager, MessageParser, WsError};

/// Parser for FloatChat backend frames.
#[non_exhaustive]
#[derive(Clone, Debug, Default)]
pub struct ChatParser;

impl MessageParser<ChatMessage> for ChatParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ChatMessage>> {
        parse_messages(bytes)
    }
}

/// Client for the FloatChat query socket.
///
/// The connection is opened explicitly with [`Client::connect`] and recovers on its own
/// from unintended closes. Every subscription has its own receiver, so any number of
/// [`ask`](Client::ask) or [`messages`](Client::messages) streams can be live at once.
///
/// # Examples
///
/// ```rust, no_run
/// use floatchat_client::chat::Client;
/// use futures::StreamExt as _;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::default();
///     client.connect().await?;
///
///     let stream = client.ask("send me the temperature near the equator of October 2024")?;
///     let mut stream = Box::pin(stream);
///
///     while let Some(message) = stream.next().await {
///         println!("{:?}", message?);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::default()).expect("Client with default endpoint should succeed")
    }
}

struct ClientInner {
    /// Configuration for the connection
    config: Config,
    /// Connection manager for the WebSocket
    connection: ConnectionManager<ChatMessage, ChatParser>,
}

impl Client {
    /// Create a client for `config.endpoint`. No connection is made yet.
    pub fn new(config: Config) -> Result<Self> {
        let connection = ConnectionManager::new(config.clone(), ChatParser)?;

        Ok(Self {
            inner: Arc::new(ClientInner { config, connection }),
        })
    }

    /// Open the connection, waiting at most [`Config::connect_timeout`].
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The underlying connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<ChatMessage, ChatParser> {
        &self.inner.connection
    }

    /// Send a query without waiting for its answer.
    ///
    /// Blank queries are rejected before anything is sent; the backend refuses them.
    pub fn send_query(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%query, "Sending query");

        self.inner.connection.send(&Query::new(query))
    }

    /// Send a query and stream the backend's answer.
    ///
    /// The stream yields every message up to and including the first terminal one
    /// (see [`ChatMessage::is_terminal`]), then ends. It ends with
    /// [`WsError::ConnectionClosed`] when the connection goes away first, because the
    /// backend forgets in-progress queries on disconnect.
    pub fn ask(&self, query: &str) -> Result<impl Stream<Item = Result<ChatMessage>> + use<>> {
        // Subscribe before sending so no early stage can be missed
        let mut rx = self.inner.connection.events();
        self.send_query(query)?;

        Ok(try_stream! {
            loop {
                match rx.recv().await {
                    Ok(ConnectionEvent::Message(message)) => {
                        let done = message.is_terminal();
                        yield message;
                        if done {
                            break;
                        }
                    }
                    Ok(ConnectionEvent::Closed(reason)) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?reason, "Connection closed before the answer completed");
                        #[cfg(not(feature = "tracing"))]
                        let _: &CloseReason = &reason;
                        Err(WsError::ConnectionClosed)?;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Answer stream lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        Err(WsError::ConnectionClosed)?;
                    }
                }
            }
        })
    }

    /// Stream of every message from the backend.
    pub fn messages(&self) -> impl Stream<Item = Result<ChatMessage>> + use<> {
        self.inner.connection.messages()
    }

    /// Stream of transport errors and reconnection failures.
    pub fn errors(&self) -> impl Stream<Item = Arc<WsError>> + use<> {
        self.inner.connection.errors()
    }

    /// Stream of close notifications.
    pub fn closes(&self) -> impl Stream<Item = CloseReason> + use<> {
        self.inner.connection.closes()
    }
}
