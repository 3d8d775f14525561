//! Gateway capabilities reported by the `info` probe.

use janus_core::{Frame, JanusError, Result};
use serde_json::Value;

/// Parsed `server_info` reply.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerInfo {
    frame: Frame,
}

impl ServerInfo {
    /// Wrap a `server_info` frame.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        if frame.kind().as_str() != "server_info" {
            return Err(JanusError::unexpected(
                "info",
                format!("expected server_info, got {}", frame.kind()),
            ));
        }
        Ok(Self { frame })
    }

    /// Server name.
    pub fn name(&self) -> Option<&str> {
        self.frame.get("name").and_then(Value::as_str)
    }

    /// Numeric version.
    pub fn version(&self) -> Option<u64> {
        self.frame.get("version").and_then(Value::as_u64)
    }

    /// Human-readable version.
    pub fn version_string(&self) -> Option<&str> {
        self.frame.get("version_string").and_then(Value::as_str)
    }

    /// Names of the plugins the gateway has loaded.
    pub fn plugins(&self) -> Vec<&str> {
        self.frame
            .get("plugins")
            .and_then(Value::as_object)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `plugin` is loaded.
    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.frame
            .get("plugins")
            .and_then(|p| p.get(plugin))
            .is_some()
    }

    /// The raw reply.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}
