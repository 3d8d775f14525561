//! Plugin reply interpretation.
//!
//! Plugin requests travel inside a `message`; the gateway answers with a
//! frame whose `plugindata` carries the plugin's own reply. A plugin failure
//! still arrives as a gateway-level success, so it has to be detected here.

use janus_core::{Frame, HandleId, PluginError};
use serde_json::Value;

/// Successful plugin reply.
#[derive(Clone, Debug, PartialEq)]
pub struct PluginResponse {
    frame: Frame,
    handle: HandleId,
}

impl PluginResponse {
    /// Interpret `frame` as the reply to a message sent on `handle`.
    pub fn from_frame(frame: Frame, handle: HandleId) -> Result<Self, PluginError> {
        match PluginError::from_frame(&frame, handle) {
            Some(err) => Err(err),
            None => Ok(Self { frame, handle }),
        }
    }

    /// Replying plugin, e.g. `janus.plugin.videoroom`.
    pub fn plugin(&self) -> Option<&str> {
        self.frame.plugin_name()
    }

    /// The plugin's payload.
    pub fn data(&self) -> Option<&Value> {
        self.frame.plugin_data()
    }

    /// Session description, when the plugin sent one.
    pub fn jsep(&self) -> Option<&Value> {
        self.frame.jsep()
    }

    /// Handle the message was sent on.
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// The raw reply.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Unwrap the raw reply.
    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> Frame {
        Frame::from_value(value).unwrap()
    }

    #[test]
    fn success_exposes_payload() {
        let res = PluginResponse::from_frame(
            frame(json!({
                "janus": "success",
                "sender": 9,
                "plugindata": {"plugin": "janus.plugin.echotest", "data": {"result": "ok"}},
                "jsep": {"type": "answer", "sdp": "v=0"}
            })),
            HandleId::new(9),
        )
        .unwrap();
        assert_eq!(res.plugin(), Some("janus.plugin.echotest"));
        assert_eq!(res.data().unwrap()["result"], "ok");
        assert_eq!(res.jsep().unwrap()["type"], "answer");
        assert_eq!(res.handle(), HandleId::new(9));
    }

    #[test]
    fn nested_error_is_plugin_error() {
        let err = PluginResponse::from_frame(
            frame(json!({
                "janus": "success",
                "plugindata": {
                    "plugin": "janus.plugin.videoroom",
                    "data": {"error_code": 426, "error": "No such room"}
                }
            })),
            HandleId::new(3),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(426));
        assert_eq!(err.message.as_deref(), Some("No such room"));
        assert_eq!(err.handle, HandleId::new(3));
    }

    #[test]
    fn reply_without_plugindata_is_accepted() {
        let res = PluginResponse::from_frame(frame(json!({"janus": "ack"})), HandleId::new(1)).unwrap();
        assert!(res.data().is_none());
    }
}
