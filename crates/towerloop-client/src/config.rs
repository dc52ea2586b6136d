//! Channel client configuration.

use std::time::Duration;

use url::Url;

/// Channel client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address used by `subscribe` when none is given
    pub default_address: String,
    /// Page origin that relative addresses are resolved against
    pub origin: Option<Url>,
    /// Fixed delay between a lost connection and the next attempt
    pub retry_interval: Duration,
    /// Longest a connect attempt (TCP plus WebSocket handshake) may take
    pub connect_timeout: Duration,
    /// Interval of the `ping` keep-alive while connected
    pub heartbeat_interval: Duration,
    /// Consecutive failed attempts before giving up (None = retry forever)
    pub max_retries: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_address: "ws://localhost:3000".into(),
            origin: None,
            retry_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ClientConfig {
    pub fn with_default_address(mut self, address: impl Into<String>) -> Self {
        self.default_address = address.into();
        self
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}
