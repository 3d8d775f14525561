//! Protocol constants and engine defaults.

use std::time::Duration;

/// Current version of the client (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WebSocket subprotocol the gateway expects during the handshake.
pub const PROTOCOL: &str = "janus-protocol";

/// Default gateway URL.
pub const DEFAULT_URL: &str = "ws://localhost:8188";

/// Connection-level idle watchdog.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(40);

/// Per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

/// Session heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive heartbeat failures before a session is declared dead.
pub const DEFAULT_HEARTBEAT_FAILURES: u32 = 2;

/// Field names read from or written to wire frames.
pub mod fields {
    /// Message kind discriminator.
    pub const JANUS: &str = "janus";
    /// Correlation id.
    pub const TRANSACTION: &str = "transaction";
    /// Session routing key.
    pub const SESSION_ID: &str = "session_id";
    /// Handle routing key on outbound requests.
    pub const HANDLE_ID: &str = "handle_id";
    /// Handle routing key on inbound events.
    pub const SENDER: &str = "sender";
    /// Opaque auth token.
    pub const TOKEN: &str = "token";
    /// Opaque API secret.
    pub const API_SECRET: &str = "apisecret";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_cargo_toml() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn defaults_are_ordered() {
        // A request must be able to fail before the idle watchdog or the
        // next heartbeat fires.
        assert!(DEFAULT_REQUEST_TIMEOUT < DEFAULT_HEARTBEAT_INTERVAL);
        assert!(DEFAULT_HEARTBEAT_INTERVAL < DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn failure_threshold_is_positive() {
        assert!(DEFAULT_HEARTBEAT_FAILURES >= 1);
    }
}
