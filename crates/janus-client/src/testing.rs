//! Scripted in-memory gateway.
//!
//! [`MockGateway`] is a [`Transport`] that answers requests the way a Janus
//! gateway would, without a socket. Tests can record what was sent, inject
//! server-initiated frames, silence or fail specific request kinds, make the
//! writer reject them, override replies, and close the link from the remote
//! side.
//!
//! Default script:
//!
//! | request | reply |
//! |---|---|
//! | `info` | `server_info` with the echotest and videoroom plugins |
//! | `create`, `attach` | `success` with a fresh `data.id` |
//! | `claim` | `success` echoing `session_id` |
//! | `destroy`, `detach`, `hangup` | `success` |
//! | `keepalive`, `trickle` | `ack` |
//! | `message` with `body.request == "join"` | `ack`, then `event` |
//! | `message` | `success` with `plugindata` |
//! | anything else | `error` 453 |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use janus_core::TransportError;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::transport::{Link, LinkEnd, Outbound, SignalSender, Transport, TransportSignal};

type Responder = Arc<dyn Fn(&Value) -> Option<Vec<Value>> + Send + Sync>;

const FIRST_ID: u64 = 1_000;
const UNKNOWN_REQUEST: i64 = 453;

/// Cloneable scripted gateway. Clones share state.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    links: Vec<MockLink>,
    opens: usize,
    sent: Vec<Value>,
    silenced: HashSet<String>,
    failures: HashMap<String, (i64, String)>,
    rejected: HashMap<String, String>,
    responder: Option<Responder>,
    refuse: bool,
    next_id: u64,
    plugins: HashMap<u64, String>,
}

struct MockLink {
    signals: SignalSender,
    remote: CancellationToken,
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MockGateway")
            .field("opens", &inner.opens)
            .field("sent", &inner.sent.len())
            .finish_non_exhaustive()
    }
}

impl MockGateway {
    /// A gateway running the default script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request received so far, in arrival order.
    pub fn sent(&self) -> Vec<Value> {
        self.inner.lock().sent.clone()
    }

    /// The `janus` field of every request received so far.
    pub fn sent_kinds(&self) -> Vec<String> {
        self.inner
            .lock()
            .sent
            .iter()
            .map(|r| r["janus"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    /// How many links have been opened.
    pub fn open_count(&self) -> usize {
        self.inner.lock().opens
    }

    /// Deliver a server-initiated frame on the current link.
    pub fn push(&self, frame: Value) {
        self.push_text(&frame.to_string());
    }

    /// Deliver raw text on the current link.
    pub fn push_text(&self, text: &str) {
        self.signal(TransportSignal::Message(text.to_owned()));
    }

    /// Report a transport error on the current link without closing it.
    pub fn transport_error(&self, reason: &str) {
        self.signal(TransportSignal::Error(TransportError::Socket(reason.to_owned())));
    }

    /// Close the current link from the gateway side.
    pub fn close_remote(&self) {
        if let Some(link) = self.inner.lock().links.last() {
            link.remote.cancel();
        }
    }

    /// Stop answering requests of `kind`.
    pub fn silence(&self, kind: &str) {
        let _ = self.inner.lock().silenced.insert(kind.to_owned());
    }

    /// Resume answering requests of `kind`.
    pub fn unsilence(&self, kind: &str) {
        let _ = self.inner.lock().silenced.remove(kind);
    }

    /// Answer requests of `kind` with an `error` frame.
    pub fn fail(&self, kind: &str, code: i64, reason: &str) {
        let _ = self
            .inner
            .lock()
            .failures
            .insert(kind.to_owned(), (code, reason.to_owned()));
    }

    /// Stop failing requests of `kind`.
    pub fn recover(&self, kind: &str) {
        let _ = self.inner.lock().failures.remove(kind);
    }

    /// Make the link's writer reject requests of `kind` with a send error.
    /// Rejected requests never reach the gateway.
    pub fn reject(&self, kind: &str, reason: &str) {
        let _ = self
            .inner
            .lock()
            .rejected
            .insert(kind.to_owned(), reason.to_owned());
    }

    /// Override replies. `None` falls back to the default script.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.inner.lock().responder = Some(Arc::new(responder));
    }

    /// Make new links fail to connect.
    pub fn refuse(&self, refuse: bool) {
        self.inner.lock().refuse = refuse;
    }

    fn signal(&self, signal: TransportSignal) {
        if let Some(link) = self.inner.lock().links.last() {
            let _ = link.signals.send(signal);
        }
    }

    fn replies(&self, text: &str) -> Result<Vec<Value>, TransportError> {
        let Ok(request) = serde_json::from_str::<Value>(text) else {
            return Ok(Vec::new());
        };
        let responder = {
            let mut inner = self.inner.lock();
            let kind = request["janus"].as_str().unwrap_or_default();
            if let Some(reason) = inner.rejected.get(kind) {
                return Err(TransportError::Send(reason.clone()));
            }
            inner.sent.push(request.clone());
            inner.responder.clone()
        };
        if let Some(replies) = responder.and_then(|r| r(&request)) {
            return Ok(replies);
        }
        Ok(self.inner.lock().script(&request))
    }
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        FIRST_ID + self.next_id
    }

    fn script(&mut self, request: &Value) -> Vec<Value> {
        let kind = request["janus"].as_str().unwrap_or_default();
        if self.silenced.contains(kind) {
            return Vec::new();
        }

        let reply = |janus: &str| {
            let mut frame = json!({"janus": janus, "transaction": request["transaction"]});
            if let Some(session) = request.get("session_id") {
                frame["session_id"] = session.clone();
            }
            frame
        };

        if let Some((code, reason)) = self.failures.get(kind) {
            let mut frame = reply("error");
            frame["error"] = json!({"code": code, "reason": reason});
            return vec![frame];
        }

        match kind {
            "info" => {
                let mut frame = reply("server_info");
                frame["name"] = json!("Janus WebRTC Server");
                frame["version"] = json!(1_400);
                frame["version_string"] = json!("1.4.0");
                frame["plugins"] = json!({
                    "janus.plugin.echotest": {"name": "JANUS EchoTest plugin"},
                    "janus.plugin.videoroom": {"name": "JANUS VideoRoom plugin"}
                });
                vec![frame]
            }
            "create" => {
                let mut frame = reply("success");
                frame["data"] = json!({"id": self.next_id()});
                vec![frame]
            }
            "attach" => {
                let id = self.next_id();
                let plugin = request["plugin"].as_str().unwrap_or_default().to_owned();
                let _ = self.plugins.insert(id, plugin);
                let mut frame = reply("success");
                frame["data"] = json!({"id": id});
                vec![frame]
            }
            "claim" | "destroy" | "detach" | "hangup" => vec![reply("success")],
            "keepalive" | "trickle" => vec![reply("ack")],
            "message" => {
                let handle = request["handle_id"].as_u64().unwrap_or_default();
                let plugin = self.plugins.get(&handle).cloned().unwrap_or_default();
                let body = &request["body"];
                if body["request"] == "join" {
                    let mut event = reply("event");
                    event["sender"] = json!(handle);
                    event["plugindata"] = json!({
                        "plugin": plugin,
                        "data": {"videoroom": "joined", "room": body["room"]}
                    });
                    vec![reply("ack"), event]
                } else {
                    let mut frame = reply("success");
                    frame["sender"] = json!(handle);
                    frame["plugindata"] = json!({"plugin": plugin, "data": {"result": "ok"}});
                    vec![frame]
                }
            }
            other => {
                let mut frame = reply("error");
                frame["error"] = json!({
                    "code": UNKNOWN_REQUEST,
                    "reason": format!("Unknown request '{other}'")
                });
                vec![frame]
            }
        }
    }
}

impl Transport for MockGateway {
    fn open(&self, url: &str, signals: SignalSender) -> Link {
        let (link, end) = Link::pair();
        let mut inner = self.inner.lock();
        inner.opens += 1;

        if inner.refuse {
            let _ = signals.send(TransportSignal::Error(TransportError::Connect {
                url: url.to_owned(),
                reason: "connection refused".to_owned(),
            }));
            let _ = signals.send(TransportSignal::Closed);
            return link;
        }

        let remote = CancellationToken::new();
        inner.links.push(MockLink {
            signals: signals.clone(),
            remote: remote.clone(),
        });
        drop(inner);
        drop(tokio::spawn(serve(self.clone(), end, signals, remote)));
        link
    }
}

async fn serve(gateway: MockGateway, end: LinkEnd, signals: SignalSender, remote: CancellationToken) {
    let LinkEnd {
        mut outbound,
        shutdown,
    } = end;
    let _ = signals.send(TransportSignal::Open);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = remote.cancelled() => break,
            out = outbound.recv() => {
                let Some(Outbound { text, accepted }) = out else {
                    break;
                };
                match gateway.replies(&text) {
                    Ok(replies) => {
                        let _ = accepted.send(Ok(()));
                        for reply in replies {
                            let _ = signals.send(TransportSignal::Message(reply.to_string()));
                        }
                    }
                    Err(e) => {
                        let _ = accepted.send(Err(e));
                    }
                }
            }
        }
    }
    let _ = signals.send(TransportSignal::Closed);
}
