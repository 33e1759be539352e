#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;
use bon::Builder;
use url::Url;

use super::error::WsError;
use crate::Result;

/// Local development backend.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";
/// Environment variable that overrides the endpoint in [`Config::from_env`].
pub const ENDPOINT_VAR: &str = "FLOATCHAT_WS_URL";

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Backend endpoint, `ws://` or `wss://`
    #[builder(into, default = DEFAULT_ENDPOINT.to_owned())]
    pub endpoint: String,
    /// Maximum time to wait for the handshake to complete
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Default configuration with the endpoint taken from [`ENDPOINT_VAR`] when it is set.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENDPOINT_VAR) {
            Ok(endpoint) if !endpoint.trim().is_empty() => Self::builder().endpoint(endpoint).build(),
            _ => Self::default(),
        }
    }

    /// Parse and check the endpoint.
    ///
    /// Only `ws` and `wss` schemes are accepted.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            _ => Err(WsError::InvalidEndpoint(self.endpoint.clone()).into()),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay unit; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_ATTEMPTS), DEFAULT_BASE_DELAY_DURATION)
    }
}

impl ReconnectConfig {
    #[must_use]
    pub const fn new(max_attempts: Option<u32>, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Linearly increasing delay, bounded by a number of attempts.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl LinearBackoff {
    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && self.attempt >= max
        {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(self.base_delay.saturating_mul(self.attempt))
    }
}

impl From<ReconnectConfig> for LinearBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }
}
