//! Socket client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainsub_core::policy::RetryConfig;

/// Configuration for a [`SocketClient`](crate::SocketClient) and its transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// WebSocket endpoint, e.g. "wss://api.mainnet-beta.solana.com"
    pub url: String,
    /// Timeout for each connection attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnect backoff after the connection drops
    #[serde(default)]
    pub reconnect: RetryConfig,
}

fn default_connect_timeout_ms() -> u64 { 5_000 }

impl SocketConfig {
    /// Default settings for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: RetryConfig::default(),
        }
    }

    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
