//! Client configuration.
//!
//! Connection parameters are an explicit value handed to
//! [`ChatClient::spawn`](crate::ChatClient::spawn); nothing is read from
//! ambient state after construction.

use std::time::Duration;

pub const DEFAULT_AUTH_URL: &str = "http://localhost/api/0.0.1/login";
pub const DEFAULT_WS_URL: &str = "ws://localhost/api/0.0.1/ws";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Login endpoint that exchanges credentials for a token.
    pub auth_endpoint: String,
    /// WebSocket address; the token is appended as `?token=`.
    pub websocket_address: String,
    /// Delay between heartbeat probes while the connection is open.
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(auth_endpoint: impl Into<String>, websocket_address: impl Into<String>) -> Self {
        Self {
            auth_endpoint: auth_endpoint.into(),
            websocket_address: websocket_address.into(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }

    /// Override the heartbeat interval. A zero interval is ignored.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.heartbeat_interval = interval;
        }
        self
    }

    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `CHATLINK_AUTH_URL`: default `http://localhost/api/0.0.1/login`
    /// - `CHATLINK_WS_URL`: default `ws://localhost/api/0.0.1/ws`
    /// - `CHATLINK_HEARTBEAT_SECS`: default 60
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let auth_endpoint = get("CHATLINK_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.to_owned());
        let websocket_address = get("CHATLINK_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_owned());
        let heartbeat_secs = get("CHATLINK_HEARTBEAT_SECS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);

        Self::new(auth_endpoint, websocket_address)
            .with_heartbeat_interval(Duration::from_secs(heartbeat_secs))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_URL, DEFAULT_WS_URL)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
