//! Plugin handles.
//!
//! A [`Handle`] is the client side of one attached plugin instance. Its
//! shared state lives in the session's registry so routed events can update
//! media state without going through the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use janus_core::{Frame, FrameKind, HandleId, JanusError, Request, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::connection::expect_success;
use crate::plugin::PluginResponse;
use crate::session::Session;
use crate::transaction::TransactionOptions;

/// Handle-level notifications, one per routed frame.
#[derive(Clone, Debug)]
pub enum HandleEvent {
    /// The PeerConnection is up.
    WebRtcUp(Frame),
    /// The gateway started or stopped receiving a medium.
    Media(Frame),
    /// The PeerConnection went down.
    Hangup(Frame),
    /// Packet loss report.
    SlowLink(Frame),
    /// The plugin detached the handle.
    Detached(Frame),
    /// Remote ICE candidate.
    Trickle(Frame),
    /// Any other plugin event.
    Event(Frame),
}

/// Media sub-state driven by routed events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediaState {
    /// Between `webrtcup` and `hangup`.
    pub connected: bool,
    /// Last `media` report for audio.
    pub audio: bool,
    /// Last `media` report for video.
    pub video: bool,
}

#[derive(Debug)]
pub(crate) struct HandleShared {
    id: HandleId,
    plugin: String,
    opaque_id: Option<String>,
    media: Mutex<MediaState>,
    disposed: AtomicBool,
    events: broadcast::Sender<HandleEvent>,
}

impl HandleShared {
    pub(crate) fn new(id: HandleId, plugin: String, opaque_id: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            plugin,
            opaque_id,
            media: Mutex::new(MediaState::default()),
            disposed: AtomicBool::new(false),
            events,
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    /// Apply a routed frame and notify subscribers.
    pub(crate) fn dispatch(&self, frame: Frame) {
        debug!(handle = %self.id, kind = %frame.kind(), "handle event");
        let event = match frame.kind() {
            FrameKind::WebRtcUp => {
                self.media.lock().connected = true;
                HandleEvent::WebRtcUp(frame)
            }
            FrameKind::Hangup => {
                *self.media.lock() = MediaState::default();
                HandleEvent::Hangup(frame)
            }
            FrameKind::Media => {
                let receiving = frame
                    .get("receiving")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                {
                    let mut media = self.media.lock();
                    match frame.get("type").and_then(Value::as_str) {
                        Some("audio") => media.audio = receiving,
                        Some("video") => media.video = receiving,
                        _ => {}
                    }
                }
                HandleEvent::Media(frame)
            }
            FrameKind::SlowLink => HandleEvent::SlowLink(frame),
            FrameKind::Detached => HandleEvent::Detached(frame),
            FrameKind::Trickle => HandleEvent::Trickle(frame),
            _ => HandleEvent::Event(frame),
        };
        let _ = self.events.send(event);
    }
}

/// An attached plugin instance.
#[derive(Clone, Debug)]
pub struct Handle {
    shared: Arc<HandleShared>,
    session: Session,
}

impl Handle {
    pub(crate) fn new(shared: Arc<HandleShared>, session: Session) -> Self {
        Self { shared, session }
    }

    /// Server-assigned id.
    pub fn id(&self) -> HandleId {
        self.shared.id
    }

    /// Plugin package name.
    pub fn plugin(&self) -> &str {
        &self.shared.plugin
    }

    /// Opaque id given at attach time.
    pub fn opaque_id(&self) -> Option<&str> {
        self.shared.opaque_id.as_deref()
    }

    /// Owning session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current media state.
    pub fn media(&self) -> MediaState {
        *self.shared.media.lock()
    }

    /// Whether the PeerConnection is up.
    pub fn is_connected(&self) -> bool {
        self.shared.media.lock().connected
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Subscribe to handle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        self.shared.events.subscribe()
    }

    /// Issue `request` addressed to this handle.
    pub async fn request(&self, request: Request, options: TransactionOptions) -> Result<Frame> {
        self.session
            .request(request.with_handle(self.shared.id), options)
            .await
    }

    /// Send a plugin message and interpret the nested reply.
    ///
    /// Synchronous plugin requests are answered with `success`; for
    /// asynchronous ones pass [`TransactionOptions::ack_required`] or use
    /// [`message_async`](Self::message_async).
    pub async fn message(
        &self,
        body: Value,
        jsep: Option<Value>,
        options: TransactionOptions,
    ) -> Result<PluginResponse> {
        let request = Request::new("message")
            .with_field("body", body)
            .with_optional_field("jsep", jsep);
        let frame = self.request(request, options).await?;
        Ok(PluginResponse::from_frame(frame, self.shared.id)?)
    }

    /// [`message`](Self::message) for requests answered with `ack` then `event`.
    pub async fn message_async(&self, body: Value, jsep: Option<Value>) -> Result<PluginResponse> {
        self.message(body, jsep, TransactionOptions::ack_required())
            .await
    }

    /// Send one local ICE candidate.
    pub async fn trickle(&self, candidate: Value) -> Result<()> {
        self.send_trickle(Request::new("trickle").with_field("candidate", candidate))
            .await
    }

    /// Send a batch of local ICE candidates.
    pub async fn trickles(&self, candidates: Vec<Value>) -> Result<()> {
        self.send_trickle(Request::new("trickle").with_field("candidates", candidates))
            .await
    }

    /// Signal the end of candidate gathering.
    pub async fn trickle_completed(&self) -> Result<()> {
        self.trickle(json!({"completed": true})).await
    }

    async fn send_trickle(&self, request: Request) -> Result<()> {
        let _ = self.request(request, TransactionOptions::ack_final()).await?;
        Ok(())
    }

    /// Tear down the PeerConnection.
    pub async fn hangup(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(JanusError::HandleNotConnected {
                handle: self.shared.id,
            });
        }
        let frame = self
            .request(Request::new("hangup"), TransactionOptions::default())
            .await?;
        let _ = expect_success(frame)?;
        Ok(())
    }

    /// Detach from the plugin. The handle is unregistered either way.
    pub async fn detach(&self) -> Result<()> {
        self.session.detach(self.shared.id).await
    }

    /// Detach once; later calls fail with `AlreadyDisposed`.
    pub async fn dispose(&self) -> Result<()> {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return Err(JanusError::AlreadyDisposed {
                handle: self.shared.id,
            });
        }
        self.detach().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connection::Connection;
    use crate::testing::MockGateway;
    use assert_matches::assert_matches;
    use std::time::Duration;

    async fn attach(gateway: &MockGateway, plugin: &str) -> Handle {
        let conn = Connection::new(
            ClientConfig::new("ws://mock").with_request_timeout(Duration::from_millis(500)),
            Arc::new(gateway.clone()),
        );
        let _ = conn.open().await.unwrap();
        let session = conn.create_session().await.unwrap();
        session.attach(plugin, Some("opaque-1")).await.unwrap()
    }

    fn shared() -> HandleShared {
        HandleShared::new(HandleId::new(1), "janus.plugin.echotest".into(), None)
    }

    fn frame(value: Value) -> Frame {
        Frame::from_value(value).unwrap()
    }

    #[test]
    fn webrtcup_and_hangup_drive_media_state() {
        let shared = shared();
        let mut events = shared.events.subscribe();

        shared.dispatch(frame(json!({"janus": "webrtcup", "sender": 1})));
        assert!(shared.media.lock().connected);
        shared.dispatch(frame(json!({"janus": "media", "type": "audio", "receiving": true})));
        assert!(shared.media.lock().audio);
        shared.dispatch(frame(json!({"janus": "hangup", "reason": "DTLS alert"})));
        assert_eq!(*shared.media.lock(), MediaState::default());

        assert_matches!(events.try_recv(), Ok(HandleEvent::WebRtcUp(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Media(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Hangup(_)));
    }

    #[test]
    fn other_kinds_map_to_typed_events() {
        let shared = shared();
        let mut events = shared.events.subscribe();
        for kind in ["slowlink", "detached", "trickle", "event", "mystery"] {
            shared.dispatch(frame(json!({"janus": kind})));
        }
        assert_matches!(events.try_recv(), Ok(HandleEvent::SlowLink(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Detached(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Trickle(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Event(_)));
        assert_matches!(events.try_recv(), Ok(HandleEvent::Event(f)) if f.kind().as_str() == "mystery");
    }

    #[tokio::test(start_paused = true)]
    async fn attach_records_plugin_and_opaque_id() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.echotest").await;
        assert_eq!(handle.plugin(), "janus.plugin.echotest");
        assert_eq!(handle.opaque_id(), Some("opaque-1"));
        let attach = gateway.sent().into_iter().find(|r| r["janus"] == "attach").unwrap();
        assert_eq!(attach["plugin"], "janus.plugin.echotest");
        assert_eq!(attach["opaque_id"], "opaque-1");
    }

    #[tokio::test(start_paused = true)]
    async fn sync_message_returns_plugin_response() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.echotest").await;
        let res = handle
            .message(json!({"audio": true}), None, TransactionOptions::default())
            .await
            .unwrap();
        assert_eq!(res.plugin(), Some("janus.plugin.echotest"));
        let sent = gateway.sent().pop().unwrap();
        assert_eq!(sent["handle_id"], handle.id().get());
        assert_eq!(sent["session_id"], handle.session().id().get());
        assert_eq!(sent["body"]["audio"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn async_message_waits_for_event() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.videoroom").await;
        let res = handle
            .message_async(json!({"request": "join", "room": 1234}), None)
            .await
            .unwrap();
        assert_eq!(res.frame().kind(), &FrameKind::Event);
        assert_eq!(res.data().unwrap()["videoroom"], "joined");
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_error_carries_handle() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.videoroom").await;
        gateway.respond_with(|req| {
            (req["janus"] == "message").then(|| {
                vec![json!({
                    "janus": "success",
                    "transaction": req["transaction"],
                    "plugindata": {
                        "plugin": "janus.plugin.videoroom",
                        "data": {"error_code": 426, "error": "No such room"}
                    }
                })]
            })
        });
        let err = handle
            .message(json!({"request": "exists"}), None, TransactionOptions::default())
            .await
            .unwrap_err();
        assert_matches!(&err, JanusError::Plugin(e) if e.handle == handle.id());
        assert_eq!(err.remote_code(), Some(426));
    }

    #[tokio::test(start_paused = true)]
    async fn trickle_completes_on_ack() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.echotest").await;
        handle
            .trickle(json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0"}))
            .await
            .unwrap();
        handle.trickle_completed().await.unwrap();
        let sent = gateway.sent().pop().unwrap();
        assert_eq!(sent["janus"], "trickle");
        assert_eq!(sent["candidate"]["completed"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_requires_connected_media() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.echotest").await;
        assert_matches!(handle.hangup().await, Err(JanusError::HandleNotConnected { .. }));

        let mut events = handle.subscribe();
        gateway.push(json!({
            "janus": "webrtcup",
            "session_id": handle.session().id().get(),
            "sender": handle.id().get()
        }));
        assert_matches!(events.recv().await, Ok(HandleEvent::WebRtcUp(_)));
        handle.hangup().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_twice_fails() {
        let gateway = MockGateway::new();
        let handle = attach(&gateway, "janus.plugin.echotest").await;
        handle.dispose().await.unwrap();
        assert!(handle.is_disposed());
        assert_matches!(handle.dispose().await, Err(JanusError::AlreadyDisposed { .. }));
        assert_eq!(handle.session().handle_count().await.unwrap(), 0);
    }
}
