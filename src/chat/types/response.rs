use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of the backend's query pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum Stage {
    /// The query is being interpreted
    Analyzing,
    /// A database query is being generated
    SqlGeneration,
    /// Profiles are being fetched
    DbFetch,
    /// Fetched data is being cleaned up
    Processing,
    /// Data is ready; a `result` frame follows
    Completed,
    /// Carries the data for the query
    Result,
    /// The pipeline failed
    Error,
    /// The model answered in prose instead of selecting a region
    NoFunctionCall,
    /// Unknown stage from the backend (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

impl Stage {
    /// Whether this stage ends the answer to a query.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Result | Self::Error | Self::NoFunctionCall)
    }
}

/// A progress or result frame, identified by its `stage` field.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct StageUpdate {
    pub stage: Stage,
    /// Human readable progress text
    pub message: Option<String>,
    /// Query result; usually an array of profile rows
    pub result: Option<Value>,
    /// Server-side traceback of an `error` stage
    pub traceback: Option<String>,
    /// Model reasoning steps, when the backend shares them
    pub thinking: Option<Vec<String>>,
}

/// A chat reply in the older `type`/`content` shape.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct ChatReply {
    /// Reply type as sent by the backend
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    /// The query this reply answers
    pub query: Option<String>,
    /// Unix timestamp in milliseconds
    pub timestamp: Option<i64>,
    pub thinking: Option<Vec<String>>,
}

impl ChatReply {
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }
}

/// A bare `{"error": ...}` frame, sent when a request could not be read at all.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct BackendError {
    #[builder(into)]
    pub error: String,
    pub traceback: Option<String>,
}

/// Any message received from the backend.
///
/// The backend does not enforce a schema, so the variants are tried in order and
/// anything that fits none of them is kept verbatim in [`ChatMessage::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ChatMessage {
    Stage(StageUpdate),
    Chat(ChatReply),
    Error(BackendError),
    Unknown(Value),
}

impl ChatMessage {
    /// Whether this message ends the answer to a query.
    ///
    /// Terminal messages are `result`, `error` and `no_function_call` stages, chat
    /// replies and bare backend errors.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Stage(update) => update.stage.is_terminal(),
            Self::Chat(_) | Self::Error(_) => true,
            Self::Unknown(_) => false,
        }
    }

    #[must_use]
    pub const fn stage(&self) -> Option<&Stage> {
        match self {
            Self::Stage(update) => Some(&update.stage),
            _ => None,
        }
    }

    /// The human readable text of the message, if it has one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Stage(update) => update.message.as_deref(),
            Self::Chat(reply) => reply.content.as_deref(),
            Self::Error(error) => Some(&error.error),
            Self::Unknown(_) => None,
        }
    }

    /// The result payload of a `result` stage.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Stage(update) => update.result.as_ref(),
            _ => None,
        }
    }

    /// Whether the backend reported a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self {
            Self::Stage(update) => update.stage == Stage::Error,
            Self::Error(_) => true,
            Self::Chat(_) | Self::Unknown(_) => false,
        }
    }
}

/// Deserialize messages from a text frame.
///
/// Blank frames yield nothing; arrays yield one message per element.
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<ChatMessage>> {
    crate::ws::traits::parse_json_frame(bytes)
}
