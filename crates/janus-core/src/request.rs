//! Outbound request payloads.
//!
//! A [`Request`] is built by the layer that issues it (connection, session or
//! handle) and stays immutable afterwards. Routing ids and credentials are
//! added by [`Request::stamped`], which produces the wire object for one
//! transaction without touching the request itself.

use serde_json::{Map, Value};

use crate::constants::fields;
use crate::ids::{HandleId, SessionId, TransactionId};

/// Opaque authentication fields injected into every request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Stamped as `token`.
    pub token: Option<String>,
    /// Stamped as `apisecret`.
    pub api_secret: Option<String>,
}

impl Credentials {
    /// No credentials.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any field would be stamped.
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.api_secret.is_none()
    }
}

/// A request before it is bound to a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    kind: String,
    session_id: Option<SessionId>,
    handle_id: Option<HandleId>,
    fields: Map<String, Value>,
}

impl Request {
    /// A request with the given `janus` discriminator.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            session_id: None,
            handle_id: None,
            fields: Map::new(),
        }
    }

    /// Build from a caller-supplied JSON object. The `janus` field becomes the
    /// kind; routing ids present in the object are kept.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let kind = match object.remove(fields::JANUS) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let session_id = object
            .remove(fields::SESSION_ID)
            .and_then(|v| v.as_u64())
            .map(SessionId::new);
        let handle_id = object
            .remove(fields::HANDLE_ID)
            .and_then(|v| v.as_u64())
            .map(HandleId::new);
        let _ = object.remove(fields::TRANSACTION);
        Self {
            kind,
            session_id,
            handle_id,
            fields: object,
        }
    }

    /// Address the request to a session.
    #[must_use]
    pub fn with_session(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Address the request to a plugin handle.
    #[must_use]
    pub fn with_handle(mut self, id: HandleId) -> Self {
        self.handle_id = Some(id);
        self
    }

    /// Add an arbitrary top-level field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.fields.insert(key.into(), value.into());
        self
    }

    /// Add a top-level field only when `value` is present.
    #[must_use]
    pub fn with_optional_field(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.with_field(key, v),
            None => self,
        }
    }

    /// The `janus` discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Target session, if stamped.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Target handle, if stamped.
    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle_id
    }

    /// Field lookup (excluding the discriminator and routing ids).
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Produce the wire object for one transaction.
    ///
    /// The result carries `janus`, `transaction`, any routing ids, every extra
    /// field and, when configured, `token` / `apisecret`. Credentials
    /// override same-named fields already present.
    pub fn stamped(&self, transaction: &TransactionId, credentials: &Credentials) -> Value {
        let mut out = Map::with_capacity(self.fields.len() + 6);
        let _ = out.insert(fields::JANUS.into(), Value::from(self.kind.as_str()));
        let _ = out.insert(fields::TRANSACTION.into(), Value::from(transaction.as_str()));
        if let Some(id) = self.session_id {
            let _ = out.insert(fields::SESSION_ID.into(), id.into());
        }
        if let Some(id) = self.handle_id {
            let _ = out.insert(fields::HANDLE_ID.into(), id.into());
        }
        for (k, v) in &self.fields {
            let _ = out.insert(k.clone(), v.clone());
        }
        if let Some(token) = &credentials.token {
            let _ = out.insert(fields::TOKEN.into(), Value::from(token.as_str()));
        }
        if let Some(secret) = &credentials.api_secret {
            let _ = out.insert(fields::API_SECRET.into(), Value::from(secret.as_str()));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamped_carries_kind_and_transaction() {
        let tx = TransactionId::from("t-1");
        let v = Request::new("info").stamped(&tx, &Credentials::none());
        assert_eq!(v, json!({"janus": "info", "transaction": "t-1"}));
    }

    #[test]
    fn stamped_includes_routing_and_fields() {
        let tx = TransactionId::from("t-2");
        let req = Request::new("attach")
            .with_session(SessionId::new(10))
            .with_field("plugin", "janus.plugin.echotest")
            .with_optional_field("opaque_id", None::<String>);
        let v = req.stamped(&tx, &Credentials::none());
        assert_eq!(v["session_id"], 10);
        assert_eq!(v["plugin"], "janus.plugin.echotest");
        assert!(v.get("opaque_id").is_none());
        assert!(v.get("handle_id").is_none());
    }

    #[test]
    fn stamped_injects_credentials() {
        let creds = Credentials {
            token: Some("tok".into()),
            api_secret: Some("sec".into()),
        };
        let v = Request::new("create").stamped(&TransactionId::new(), &creds);
        assert_eq!(v["token"], "tok");
        assert_eq!(v["apisecret"], "sec");
        assert!(!creds.is_empty());
    }

    #[test]
    fn stamping_leaves_request_untouched() {
        let req = Request::new("keepalive").with_session(SessionId::new(1));
        let a = req.stamped(&TransactionId::from("a"), &Credentials::none());
        let b = req.stamped(&TransactionId::from("b"), &Credentials::none());
        assert_eq!(a["transaction"], "a");
        assert_eq!(b["transaction"], "b");
        assert!(req.field("transaction").is_none());
    }

    #[test]
    fn from_object_extracts_routing() {
        let obj = json!({
            "janus": "message",
            "session_id": 3,
            "handle_id": 4,
            "transaction": "stale",
            "body": {"request": "list"}
        });
        let Value::Object(map) = obj else { unreachable!() };
        let req = Request::from_object(map);
        assert_eq!(req.kind(), "message");
        assert_eq!(req.session_id(), Some(SessionId::new(3)));
        assert_eq!(req.handle_id(), Some(HandleId::new(4)));
        assert!(req.field("transaction").is_none());

        let v = req.stamped(&TransactionId::from("fresh"), &Credentials::none());
        assert_eq!(v["transaction"], "fresh");
        assert_eq!(v["body"]["request"], "list");
    }
}
