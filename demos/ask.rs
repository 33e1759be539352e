//! Ask the FloatChat backend one question and log every stage of the answer.
//!
//! Run against a local backend with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example ask --features tracing -- "salinity near Chennai in 2023"
//! ```
//!
//! Set `FLOATCHAT_WS_URL` to talk to another backend.

use floatchat_client::chat::{ChatMessage, Client};
use floatchat_client::ws::config::Config;
use futures::StreamExt as _;
use tracing::{info, warn};

const DEFAULT_QUERY: &str = "send me the temperature near the equator of October 2024";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_QUERY.to_owned());

    let client = Client::new(Config::from_env())?;
    info!(endpoint = %client.config().endpoint, "Connecting");
    client.connect().await?;

    info!(%query, "Sending query");
    let mut stream = Box::pin(client.ask(&query)?);

    while let Some(message) = stream.next().await {
        match message? {
            ChatMessage::Stage(update) => {
                info!(
                    stage = %update.stage,
                    message = update.message.as_deref().unwrap_or_default(),
                    rows = ?update.result.as_ref().and_then(|r| r.as_array()).map(Vec::len),
                );
                if let Some(traceback) = update.traceback {
                    warn!(%traceback, "Backend reported an error");
                }
            }
            ChatMessage::Chat(reply) => {
                info!(
                    kind = %reply.kind,
                    content = reply.content.as_deref().unwrap_or_default(),
                    timestamp = ?reply.timestamp_utc(),
                );
            }
            ChatMessage::Error(error) => warn!(error = %error.error, "Backend rejected the query"),
            other => info!(message = ?other, "Unrecognized message"),
        }
    }

    client.disconnect();
    Ok(())
}
