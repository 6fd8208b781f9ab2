//! Session store configuration.

use crate::error::{SessionError, SessionResult};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable that enables a [`Activation::Manual`] store.
pub const ENABLED_ENV: &str = "CAPSTAN_SESSION_ENABLED";

/// Store activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// The store is always active.
    #[default]
    Auto,
    /// The store is active only when [`ENABLED_ENV`] is set to a truthy
    /// value in the process environment.
    Manual,
}

impl FromStr for Activation {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(SessionError::Config(format!(
                "unsupported activation mode: {other}"
            ))),
        }
    }
}

/// Session store configuration.
///
/// Read once, at store construction; later environment changes have no
/// effect on a constructed store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Prefix for every key owned by this store, so one Redis instance can
    /// be shared between applications.
    pub prefix: String,
    /// Activation mode.
    pub activation: Activation,
    /// How long a `load` waits for some node to answer a drain request.
    pub drain_timeout: Duration,
    /// Interval between response-marker checks while waiting for an answer.
    pub drain_poll_interval: Duration,
    /// Ceiling on waiting for an answered drain's payload to appear.
    pub await_timeout: Duration,
    /// Interval between storage polls after a drain was answered.
    pub await_poll_interval: Duration,
    /// Expiry on the drain response marker.
    pub marker_ttl: Duration,
    /// Cap on the backoff while waiting out a session's in-flight request.
    pub processing_backoff_cap: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            prefix: "capstan".to_string(),
            activation: Activation::Auto,
            drain_timeout: Duration::from_secs(1),
            drain_poll_interval: Duration::from_millis(100),
            await_timeout: Duration::from_secs(5 * 60),
            await_poll_interval: Duration::from_millis(500),
            marker_ttl: Duration::from_secs(5),
            processing_backoff_cap: Duration::from_millis(50),
        }
    }
}

impl SessionStoreConfig {
    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration overrides from environment variables.
    pub fn from_env() -> SessionResult<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("CAPSTAN_SESSION_PREFIX") {
            config.prefix = prefix;
        }

        if let Ok(activation) = std::env::var("CAPSTAN_SESSION_ACTIVATION") {
            config.activation = activation.parse()?;
        }

        Ok(config)
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the activation mode.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Set the drain request timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the post-answer await ceiling.
    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_timeout = timeout;
        self
    }

    /// Set the response marker TTL.
    pub fn with_marker_ttl(mut self, ttl: Duration) -> Self {
        self.marker_ttl = ttl;
        self
    }

    /// Resolve whether a store built from this configuration is active,
    /// consulting the process environment for [`Activation::Manual`].
    pub fn resolve_enabled(&self) -> bool {
        match self.activation {
            Activation::Auto => true,
            Activation::Manual => std::env::var(ENABLED_ENV)
                .map(|v| {
                    let v = v.trim().to_lowercase();
                    v == "true" || v == "1" || v == "yes"
                })
                .unwrap_or(false),
        }
    }

    /// Key holding one serialized session.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    /// Sorted-set key indexing session ids by expiration instant.
    pub fn index_key(&self) -> String {
        format!("{}:sessions", self.prefix)
    }

    /// Short-lived key a drain responder writes to answer a request.
    pub fn request_key(&self, session_id: &str) -> String {
        format!("{}:request", self.session_key(session_id))
    }
}
