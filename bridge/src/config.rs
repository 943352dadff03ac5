use std::net::SocketAddr;
use std::time::Duration;

use courier_core::MessengerConfig;

/// Settings for one HTTP bridge peer.
#[derive(Debug, Clone)]
pub struct HttpBridgeConfig {
    /// Local address accepting `POST /<channel>`
    pub bind_addr: SocketAddr,
    /// Base URL of the peer that outgoing payloads are posted to
    pub remote_url: String,
    /// Per-request timeout for outgoing posts
    pub request_timeout: Duration,
    pub messenger: MessengerConfig,
}

impl Default for HttpBridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8470)),
            remote_url: "http://127.0.0.1:8471".to_string(),
            request_timeout: Duration::from_secs(10),
            messenger: MessengerConfig::default(),
        }
    }
}

impl HttpBridgeConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            bind_addr: std::env::var("COURIER_BRIDGE_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.bind_addr),
            remote_url: std::env::var("COURIER_BRIDGE_REMOTE").unwrap_or(default.remote_url),
            request_timeout: std::env::var("COURIER_BRIDGE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.request_timeout),
            messenger: MessengerConfig::from_env(),
        }
    }
}
