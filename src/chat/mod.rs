//! Client for the FloatChat query socket.
//!
//! The backend answers each `{"query": "..."}` frame with a run of progress stages
//! followed by one terminal message:
//!
//! - `analyzing`, `sql_generation`, `db_fetch`, `processing`, `completed`
//! - then `result` with the fetched profiles, `error`, or `no_function_call`
//!   when the model replied in prose
//!
//! # Example
//!
//! ```rust, no_run
//! use floatchat_client::chat::{ChatMessage, Client};
//! use futures::StreamExt as _;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::default();
//!     client.connect().await?;
//!
//!     let mut answer = Box::pin(client.ask("salinity in the Arabian Sea last March")?);
//!     while let Some(message) = answer.next().await {
//!         match message? {
//!             ChatMessage::Stage(update) => println!("{}: {:?}", update.stage, update.message),
//!             other => println!("{other:?}"),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod types;

// Re-export commonly used types
pub use client::{ChatParser, Client};
pub use types::request::Query;
pub use types::response::{BackendError, ChatMessage, ChatReply, Stage, StageUpdate};
