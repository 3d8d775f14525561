//! Engine configuration.
//!
//! [`ClientConfig`] is what a [`Connection`](crate::Connection) runs with;
//! it is usually derived from layered [`JanusSettings`] and then adjusted
//! with the builder methods.

use std::time::Duration;

use janus_core::Credentials;
use janus_core::constants::{
    DEFAULT_HEARTBEAT_FAILURES, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_URL,
};
use janus_settings::JanusSettings;

/// Capacity of the broadcast channels carrying connection, session, and
/// handle events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection-level configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Gateway URL.
    pub url: String,
    /// Idle watchdog; any inbound frame resets it.
    pub idle_timeout: Duration,
    /// Reconnect after an idle-timeout close.
    pub reconnect: bool,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// Credentials stamped into every request.
    pub credentials: Credentials,
    /// Configuration handed to every session created on this connection.
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credentials: Credentials::none(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(settings: &JanusSettings) -> Self {
        let c = &settings.connection;
        Self {
            url: c.url.clone(),
            idle_timeout: c.idle_timeout(),
            reconnect: c.reconnect,
            request_timeout: c.request_timeout(),
            credentials: Credentials {
                token: c.token.clone(),
                api_secret: c.api_secret.clone(),
            },
            session: SessionConfig {
                heartbeat_interval: settings.session.heartbeat_interval(),
                heartbeat_failures: settings.session.heartbeat_failures,
            },
        }
    }

    /// Set the idle watchdog.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable reconnect after idle timeout.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the default request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the opaque token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.token = Some(token.into());
        self
    }

    /// Set the opaque API secret.
    #[must_use]
    pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials.api_secret = Some(secret.into());
        self
    }

    /// Set the session configuration.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Session heartbeat configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Keepalive period. Any request through the session restarts it.
    pub heartbeat_interval: Duration,
    /// Consecutive keepalive failures before the session is dead.
    pub heartbeat_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_failures: DEFAULT_HEARTBEAT_FAILURES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.url, "ws://localhost:8188");
        assert_eq!(c.idle_timeout, Duration::from_secs(40));
        assert!(c.reconnect);
        assert_eq!(c.request_timeout, Duration::from_secs(6));
        assert!(c.credentials.is_empty());
        assert_eq!(c.session.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(c.session.heartbeat_failures, 2);
    }

    #[test]
    fn from_settings_copies_every_field() {
        let mut s = JanusSettings::default();
        s.connection.url = "wss://gw:8989".into();
        s.connection.idle_timeout_ms = 1_000;
        s.connection.reconnect = false;
        s.connection.request_timeout_ms = 250;
        s.connection.token = Some("tok".into());
        s.session.heartbeat_interval_ms = 5_000;
        s.session.heartbeat_failures = 4;

        let c = ClientConfig::from_settings(&s);
        assert_eq!(c.url, "wss://gw:8989");
        assert_eq!(c.idle_timeout, Duration::from_secs(1));
        assert!(!c.reconnect);
        assert_eq!(c.request_timeout, Duration::from_millis(250));
        assert_eq!(c.credentials.token.as_deref(), Some("tok"));
        assert!(c.credentials.api_secret.is_none());
        assert_eq!(c.session.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(c.session.heartbeat_failures, 4);
    }

    #[test]
    fn builder_methods() {
        let c = ClientConfig::new("ws://gw:8188")
            .with_idle_timeout(Duration::from_millis(100))
            .with_reconnect(false)
            .with_api_secret("secret");
        assert_eq!(c.url, "ws://gw:8188");
        assert_eq!(c.idle_timeout, Duration::from_millis(100));
        assert!(!c.reconnect);
        assert_eq!(c.credentials.api_secret.as_deref(), Some("secret"));
    }
}
