//! Configuration for hubsocket

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::HubError;

/// What the supervisor does after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Failures are terminal; the client closes permanently.
    Disabled,
    /// Tear down, wait this long, reopen. Retries forever.
    Fixed(Duration),
}

impl ReconnectPolicy {
    /// Zero or negative disables reconnection.
    pub fn from_millis(ms: i64) -> Self {
        if ms <= 0 {
            ReconnectPolicy::Disabled
        } else {
            ReconnectPolicy::Fixed(Duration::from_millis(ms as u64))
        }
    }

    pub fn backoff(&self) -> Option<Duration> {
        match self {
            ReconnectPolicy::Disabled => None,
            ReconnectPolicy::Fixed(d) => Some(*d),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hub WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,

    /// Access token sent in the auth message
    #[serde(default)]
    pub token: String,

    /// Delay before reopening after a failure (<= 0 disables reconnection)
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: i64,

    /// Deadline for the hub to acknowledge authentication
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Deadline for dialing and upgrading the socket
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Maximum event handlers running at once (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_handlers: usize,

    /// Extra headers sent with the WebSocket upgrade request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_url() -> String {
    "ws://localhost:8123/api/websocket".to_string()
}

fn default_reconnect_backoff_ms() -> i64 {
    5000
}

fn default_auth_timeout_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: String::new(),
            headers: BTreeMap::new(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_concurrent_handlers: 0,
        }
    }
}

impl ClientConfig {
    /// Config for `url` authenticating with `token`, other fields default.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HubError::Config(e.to_string()))
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), HubError> {
        let content = toml::to_string_pretty(self).map_err(|e| HubError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from_millis(self.reconnect_backoff_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Reject values the client cannot work with.
    pub fn validate(&self) -> Result<(), HubError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(HubError::Config(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.auth_timeout_ms == 0 {
            return Err(HubError::Config("auth_timeout_ms must be positive".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(HubError::Config(
                "handshake_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
