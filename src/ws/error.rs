#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// The handshake did not complete within the configured bound
    Timeout(Duration),
    /// The transport failed before the connection opened
    Refused(tokio_tungstenite::tungstenite::Error),
    /// Error on an established connection
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A frame was sent while the connection was not open
    NotConnected,
    /// Another connection attempt is already in flight
    AttemptInFlight,
    /// The connection attempt was cancelled by `disconnect`
    Aborted,
    /// The reconnection budget was exhausted
    MaxRetriesExceeded {
        /// Number of reconnection attempts that were made
        attempts: u32,
    },
    /// An inbound frame was not valid JSON
    MalformedMessage(serde_json::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The endpoint URL is not a valid `ws://` or `wss://` URL
    InvalidEndpoint(String),
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "WebSocket connection timed out after {after:?}"),
            Self::Refused(e) => write!(f, "WebSocket connection refused: {e}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::AttemptInFlight => write!(f, "A WebSocket connection attempt is already in flight"),
            Self::Aborted => write!(f, "WebSocket connection attempt aborted by disconnect"),
            Self::MaxRetriesExceeded { attempts } => write!(
                f,
                "Max reconnection attempts reached ({attempts}), backend may be unavailable"
            ),
            Self::MalformedMessage(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::InvalidEndpoint(endpoint) => write!(f, "Invalid WebSocket endpoint: {endpoint}"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Refused(e) | Self::Connection(e) => Some(e),
            Self::MalformedMessage(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<Arc<WsError>> for crate::error::Error {
    fn from(e: Arc<WsError>) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    #[test]
    fn max_retries_display_names_attempts() {
        let error = WsError::MaxRetriesExceeded { attempts: 5 };

        assert_eq!(
            error.to_string(),
            "Max reconnection attempts reached (5), backend may be unavailable"
        );
    }

    #[test]
    fn converts_into_websocket_kind() {
        let error: Error = WsError::NotConnected.into();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::NotConnected)
        ));
    }

    #[test]
    fn shared_error_still_downcasts() {
        let error: Error = Arc::new(WsError::Timeout(Duration::from_secs(5))).into();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::Timeout(_))
        ));
    }

    #[test]
    fn malformed_message_exposes_source() {
        let parse_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error = WsError::MalformedMessage(parse_error);

        assert!(error.source().is_some());
    }
}
