//! Watch the connection lifecycle: state changes, errors and closes.
//!
//! Start it, then stop and restart the backend to see reconnection at work:
//! ```sh
//! RUST_LOG=info cargo run --example watch_connection --features tracing
//! ```

use std::time::Duration;

use floatchat_client::chat::Client;
use floatchat_client::ws::config::Config;
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let client = Client::new(Config::from_env())?;

    let mut state = client.state_receiver();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = ?current, "Connection state changed");
        }
    });

    let mut errors = Box::pin(client.errors());
    tokio::spawn(async move {
        while let Some(e) = errors.next().await {
            error!(error = %e, "Connection error");
        }
    });

    let mut closes = Box::pin(client.closes());
    tokio::spawn(async move {
        while let Some(reason) = closes.next().await {
            info!(?reason, "Connection closed");
        }
    });

    if let Err(e) = client.connect().await {
        // Retries continue in the background
        error!(error = %e, "Initial connection failed");
    }

    // Keep watching for a while so reconnects can be observed
    let mut messages = Box::pin(client.messages());
    while let Ok(Some(message)) = timeout(Duration::from_secs(60), messages.next()).await {
        info!(message = ?message?, "Received");
    }

    client.disconnect();
    Ok(())
}
