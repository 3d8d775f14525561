//! Lifecycle states shared between the engine and its error types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport lifecycle of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport opening.
    Connecting,
    /// Transport open; requests are accepted.
    Connected,
    /// Transport shutting down.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Progress of a single request/response exchange. Transitions are
/// monotonic: `New → Started → Receiving → Ended`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Created, not yet sent.
    #[default]
    New,
    /// Sent; nothing received yet.
    Started,
    /// At least one correlated frame received.
    Receiving,
    /// Terminal.
    Ended,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Started => write!(f, "started"),
            Self::Receiving => write!(f, "receiving"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Liveness of a gateway session as seen through its heartbeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Last heartbeat succeeded.
    Alive,
    /// Recent heartbeats failed, threshold not reached.
    Dying,
    /// Terminal; the heartbeat loop is stopped.
    Dead,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Dying => write!(f, "dying"),
            Self::Dead => write!(f, "dead"),
        }
    }
}
