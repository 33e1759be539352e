//! Core traits for generic WebSocket infrastructure.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::error::WsError;

/// Message parser trait for converting raw bytes to messages.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M: DeserializeOwned>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return an empty vec for frames that carry nothing.
    /// Handles both single objects and arrays of messages.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;
}

/// Parses any [`DeserializeOwned`] type from a JSON object or array frame.
#[derive(Debug)]
pub struct JsonParser<M>(PhantomData<fn() -> M>);

impl<M> JsonParser<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<M> Default for JsonParser<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for JsonParser<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M: DeserializeOwned + 'static> MessageParser<M> for JsonParser<M> {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>> {
        parse_json_frame(bytes)
    }
}

/// Decode a frame that holds either one JSON value or an array of them.
///
/// Blank frames decode to nothing. Anything that is not valid JSON for `M`
/// is reported as [`WsError::MalformedMessage`].
pub fn parse_json_frame<M: DeserializeOwned>(bytes: &[u8]) -> crate::Result<Vec<M>> {
    let trimmed = bytes.trim_ascii();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    let decoded = if trimmed.first() == Some(&b'[') {
        serde_json::from_slice::<Vec<M>>(trimmed)
    } else {
        serde_json::from_slice::<M>(trimmed).map(|message| vec![message])
    };

    decoded.map_err(|e| WsError::MalformedMessage(e).into())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn parses_single_object() {
        let messages: Vec<Value> = JsonParser::new().parse(br#"{"stage":"analyzing"}"#).unwrap();

        assert_eq!(messages, vec![json!({"stage": "analyzing"})]);
    }

    #[test]
    fn parses_array_of_objects() {
        let messages: Vec<Value> = JsonParser::new()
            .parse(br#" [{"stage":"processing"},{"stage":"completed"}] "#)
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["stage"], "completed");
    }

    #[test]
    fn blank_frame_is_empty() {
        let messages: Vec<Value> = JsonParser::new().parse(b" \n\t ").unwrap();

        assert!(messages.is_empty());
    }

    #[test]
    fn non_json_is_malformed() {
        let error = JsonParser::<Value>::new().parse(b"hello there").unwrap_err();

        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::MalformedMessage(_))
        ));
    }
}
