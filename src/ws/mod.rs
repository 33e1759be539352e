//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that can be
//! specialized for different message types using the [`MessageParser`] trait.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Generic WebSocket connection handler with bounded reconnection
//! - [`MessageParser`]: Trait for parsing incoming WebSocket messages
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(Config::default(), JsonParser::<Value>::new())?;
//! let mut errors = Box::pin(connection.errors());
//! connection.connect().await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{CloseReason, ConnectionEvent, ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
