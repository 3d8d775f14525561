//! Error hierarchy for the Janus client.
//!
//! Remote failures are converted into structured types so callers can branch
//! on code and kind instead of matching strings:
//!
//! - [`JanusError`]: top-level enum, one variant per failure domain
//! - [`ResponseError`]: the gateway answered with an `error` frame
//! - [`PluginError`]: the gateway succeeded but the nested plugin payload failed
//! - [`TransportError`]: socket, send, and parse failures
//!
//! Local misuse (wrong connection or transaction state) travels through the
//! same async completion channel as remote errors.

use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;
use crate::ids::{HandleId, TransactionId};
use crate::state::{ConnectionState, TransactionState};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, JanusError>;

/// Failures of the underlying byte channel.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The link could not be established.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Target URL.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The writer rejected an outbound frame.
    #[error("send failed: {0}")]
    Send(String),

    /// The link is gone.
    #[error("link closed")]
    Closed,

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Socket-level error reported by the transport.
    #[error("socket error: {0}")]
    Socket(String),
}

/// The gateway answered a request with an `error` frame.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("gateway error {}: {}", fmt_code(*.code), .reason.as_deref().unwrap_or("unknown reason"))]
pub struct ResponseError {
    /// Remote error code.
    pub code: Option<i64>,
    /// Remote reason.
    pub reason: Option<String>,
    /// The offending frame.
    pub frame: Frame,
}

impl ResponseError {
    /// Build from an `error` frame (or any frame that should have been `success`).
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            code: frame.error_code(),
            reason: frame.error_reason().map(str::to_owned),
            frame,
        }
    }
}

/// The nested plugin payload of an otherwise successful reply signals an error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("plugin error {} on handle {handle}: {}", fmt_code(*.code), .message.as_deref().unwrap_or("unknown error"))]
pub struct PluginError {
    /// Plugin-specific error code (`plugindata.data.error_code`).
    pub code: Option<i64>,
    /// Plugin-specific message (`plugindata.data.error`).
    pub message: Option<String>,
    /// Handle the request was issued on.
    pub handle: HandleId,
    /// The offending frame.
    pub frame: Frame,
}

impl PluginError {
    /// Extract the plugin error from `frame`, if its payload carries one.
    pub fn from_frame(frame: &Frame, handle: HandleId) -> Option<Self> {
        let data = frame.plugin_data()?;
        let message = data.get("error");
        let code = data.get("error_code");
        if message.is_none() && code.is_none() {
            return None;
        }
        Some(Self {
            code: code.and_then(serde_json::Value::as_i64),
            message: message.map(|m| match m.as_str() {
                Some(s) => s.to_owned(),
                None => m.to_string(),
            }),
            handle,
            frame: frame.clone(),
        })
    }
}

fn fmt_code(code: Option<i64>) -> String {
    code.map_or_else(|| "?".to_owned(), |c| c.to_string())
}

/// Top-level error type for the Janus client.
#[derive(Clone, Debug, Error)]
pub enum JanusError {
    /// A send was attempted while the connection was not connected.
    #[error("wrong connection state: {state}")]
    ConnectionState {
        /// State observed when the request was rejected.
        state: ConnectionState,
    },

    /// A transaction operation was invoked in a state that forbids it.
    #[error("invalid transaction state: {id} is {state}")]
    InvalidTransactionState {
        /// Transaction id.
        id: TransactionId,
        /// State at the time of the call.
        state: TransactionState,
    },

    /// The deadline elapsed with required signals outstanding.
    #[error("transaction {id} timed out after {}ms", .timeout.as_millis())]
    TransactionTimeout {
        /// Transaction id.
        id: TransactionId,
        /// Configured deadline.
        timeout: Duration,
    },

    /// The gateway answered with an `error` frame.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The plugin payload signalled an error.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply lacked a field or kind the request requires.
    #[error("unexpected response to {request}: {reason}")]
    UnexpectedResponse {
        /// Request kind that was answered.
        request: String,
        /// What was missing or wrong.
        reason: String,
    },

    /// A media operation needs an established PeerConnection.
    #[error("handle {handle} is not connected")]
    HandleNotConnected {
        /// Handle id.
        handle: HandleId,
    },

    /// The handle was already disposed.
    #[error("handle {handle} already disposed")]
    AlreadyDisposed {
        /// Handle id.
        handle: HandleId,
    },

    /// The task behind a client object has stopped.
    #[error("{component} is no longer running")]
    Closed {
        /// Which component.
        component: &'static str,
    },
}

impl JanusError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionState { .. } => "CONNECTION_STATE",
            Self::InvalidTransactionState { .. } => "INVALID_TRANSACTION_STATE",
            Self::TransactionTimeout { .. } => "TRANSACTION_TIMEOUT",
            Self::Response(_) => "RESPONSE_ERROR",
            Self::Plugin(_) => "PLUGIN_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::UnexpectedResponse { .. } => "UNEXPECTED_RESPONSE",
            Self::HandleNotConnected { .. } => "HANDLE_NOT_CONNECTED",
            Self::AlreadyDisposed { .. } => "ALREADY_DISPOSED",
            Self::Closed { .. } => "CLOSED",
        }
    }

    /// Error code reported by the gateway or plugin, if the failure was remote.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Self::Response(e) => e.code,
            Self::Plugin(e) => e.code,
            _ => None,
        }
    }

    /// Whether the failure originated on the gateway side.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Response(_) | Self::Plugin(_))
    }

    /// Shorthand for an [`UnexpectedResponse`](Self::UnexpectedResponse).
    pub fn unexpected(request: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            request: request.into(),
            reason: reason.into(),
        }
    }
}
