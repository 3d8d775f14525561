//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a
//! partial `settings.json` deserializes with compiled defaults filling the
//! gaps. Durations are stored in milliseconds and exposed as [`Duration`]
//! through accessor methods.

use std::time::Duration;

use janus_core::constants::{
    DEFAULT_HEARTBEAT_FAILURES, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_URL,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JanusSettings {
    /// Transport and request settings.
    pub connection: ConnectionSettings,
    /// Session liveness settings.
    pub session: SessionSettings,
}

impl JanusSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.session.validate()
    }
}

/// Gateway connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Idle watchdog in milliseconds.
    pub idle_timeout_ms: u64,
    /// Reconnect after an idle-timeout close.
    pub reconnect: bool,
    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Opaque token stamped into every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Opaque API secret stamped into every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            idle_timeout_ms: millis(DEFAULT_IDLE_TIMEOUT),
            reconnect: true,
            request_timeout_ms: millis(DEFAULT_REQUEST_TIMEOUT),
            token: None,
            api_secret: None,
        }
    }
}

impl ConnectionSettings {
    /// Idle watchdog.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("connection.url must not be empty".into()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "connection.url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.idle_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue("connection.idleTimeoutMs must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.requestTimeoutMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Session heartbeat settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Keepalive period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Consecutive keepalive failures before the session is declared dead.
    pub heartbeat_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: millis(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_failures: DEFAULT_HEARTBEAT_FAILURES,
        }
    }
}

impl SessionSettings {
    /// Keepalive period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "session.heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if self.heartbeat_failures == 0 {
            return Err(SettingsError::InvalidValue(
                "session.heartbeatFailures must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_engine_constants() {
        let s = JanusSettings::default();
        assert_eq!(s.connection.url, "ws://localhost:8188");
        assert_eq!(s.connection.idle_timeout(), Duration::from_secs(40));
        assert!(s.connection.reconnect);
        assert_eq!(s.connection.request_timeout(), Duration::from_secs(6));
        assert_eq!(s.session.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(s.session.heartbeat_failures, 2);
        assert!(s.connection.token.is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(JanusSettings::default()).unwrap();
        assert_eq!(json["connection"]["idleTimeoutMs"], 40_000);
        assert_eq!(json["session"]["heartbeatFailures"], 2);
        assert!(json["connection"].get("apiSecret").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: JanusSettings =
            serde_json::from_str(r#"{"connection": {"apiSecret": "s3cr3t"}}"#).unwrap();
        assert_eq!(s.connection.api_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(s.connection.url, DEFAULT_URL);
        assert_eq!(s.session, SessionSettings::default());
    }

    #[test]
    fn validate_rejects_bad_url() {
        let mut s = JanusSettings::default();
        s.connection.url = "http://gw:8088/janus".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("ws://"));

        s.connection.url = "  ".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut s = JanusSettings::default();
        s.connection.request_timeout_ms = 0;
        assert!(s.validate().is_err());

        let mut s = JanusSettings::default();
        s.session.heartbeat_failures = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("heartbeatFailures"));
    }
}
