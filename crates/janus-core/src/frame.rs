//! Inbound wire frames.
//!
//! Every message from the gateway is a JSON object whose `janus` field names
//! its kind. [`Frame`] keeps the raw object and exposes the handful of fields
//! the engine routes on; [`FrameKind`] turns the string discriminator into an
//! enum once, at parse time, and [`ReplyKind`] is the pure classification the
//! transaction state machine consumes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::fields;
use crate::errors::TransportError;
use crate::ids::{HandleId, SessionId, TransactionId};

/// Message kind carried in the `janus` discriminator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Early acknowledgement; the final result follows separately.
    Ack,
    /// Terminal success.
    Success,
    /// Terminal error with `error.code` / `error.reason`.
    Error,
    /// Reply to the `info` capability probe.
    ServerInfo,
    /// Plugin event, either asynchronous or the final reply to an acked request.
    Event,
    /// The gateway reclaimed a session.
    Timeout,
    /// PeerConnection for a handle is up.
    WebRtcUp,
    /// Media started or stopped flowing.
    Media,
    /// PeerConnection for a handle was closed.
    Hangup,
    /// Gateway-detected packet loss.
    SlowLink,
    /// A handle was detached on the gateway side.
    Detached,
    /// Remote ICE candidate.
    Trickle,
    /// Any discriminator this client does not interpret (including a missing one).
    Other(String),
}

impl FrameKind {
    /// Map a discriminator string to a kind.
    pub fn parse(value: &str) -> Self {
        match value {
            "ack" => Self::Ack,
            "success" => Self::Success,
            "error" => Self::Error,
            "server_info" => Self::ServerInfo,
            "event" => Self::Event,
            "timeout" => Self::Timeout,
            "webrtcup" => Self::WebRtcUp,
            "media" => Self::Media,
            "hangup" => Self::Hangup,
            "slowlink" => Self::SlowLink,
            "detached" => Self::Detached,
            "trickle" => Self::Trickle,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Discriminator string as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ack => "ack",
            Self::Success => "success",
            Self::Error => "error",
            Self::ServerInfo => "server_info",
            Self::Event => "event",
            Self::Timeout => "timeout",
            Self::WebRtcUp => "webrtcup",
            Self::Media => "media",
            Self::Hangup => "hangup",
            Self::SlowLink => "slowlink",
            Self::Detached => "detached",
            Self::Trickle => "trickle",
            Self::Other(s) => s,
        }
    }

    /// How a frame of this kind affects the transaction it correlates with.
    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::Error => ReplyKind::Error,
            Self::Ack => ReplyKind::Ack,
            _ => ReplyKind::Terminal,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a correlated reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    /// Terminates the transaction with a response error.
    Error,
    /// Non-terminal acknowledgement.
    Ack,
    /// Terminal result (success, server info, plugin event, ...).
    Terminal,
}

/// A parsed inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Frame {
    kind: FrameKind,
    body: Map<String, Value>,
}

impl Frame {
    /// Parse a text frame. Anything but a JSON object is rejected.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        match value {
            Value::Object(body) => Ok(Self::from_map(body)),
            other => Err(TransportError::Malformed(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    fn from_map(body: Map<String, Value>) -> Self {
        let kind = FrameKind::parse(body.get(fields::JANUS).and_then(Value::as_str).unwrap_or(""));
        Self { kind, body }
    }

    /// Message kind.
    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    /// Correlation id, absent on asynchronous events.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.body
            .get(fields::TRANSACTION)
            .and_then(Value::as_str)
            .map(TransactionId::from)
    }

    /// Session the frame is addressed to.
    pub fn session_id(&self) -> Option<SessionId> {
        self.body
            .get(fields::SESSION_ID)
            .and_then(Value::as_u64)
            .map(SessionId::new)
    }

    /// Handle that emitted the event.
    pub fn sender(&self) -> Option<HandleId> {
        self.body
            .get(fields::SENDER)
            .and_then(Value::as_u64)
            .map(HandleId::new)
    }

    /// Remote error code of an `error` frame.
    pub fn error_code(&self) -> Option<i64> {
        self.body.get("error")?.get("code")?.as_i64()
    }

    /// Human-readable reason of an `error` frame.
    pub fn error_reason(&self) -> Option<&str> {
        self.body.get("error")?.get("reason")?.as_str()
    }

    /// The `data` object of a `success` reply.
    pub fn data(&self) -> Option<&Value> {
        self.body.get("data")
    }

    /// The `data.id` of a `create` or `attach` reply.
    pub fn data_id(&self) -> Option<u64> {
        self.data()?.get("id")?.as_u64()
    }

    /// Name of the plugin that produced `plugindata`.
    pub fn plugin_name(&self) -> Option<&str> {
        self.body.get("plugindata")?.get("plugin")?.as_str()
    }

    /// Plugin-specific payload nested under `plugindata.data`.
    pub fn plugin_data(&self) -> Option<&Value> {
        self.body.get("plugindata")?.get("data")
    }

    /// Session description attached to the frame.
    pub fn jsep(&self) -> Option<&Value> {
        self.body.get("jsep")
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Consume the frame and return the underlying JSON.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

impl TryFrom<Map<String, Value>> for Frame {
    type Error = TransportError;

    fn try_from(body: Map<String, Value>) -> Result<Self, Self::Error> {
        Ok(Self::from_map(body))
    }
}

impl From<Frame> for Map<String, Value> {
    fn from(frame: Frame) -> Self {
        frame.body
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.body.clone()))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
