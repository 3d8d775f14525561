//! Connection actor.
//!
//! One task owns the link, the transaction registry, the session routing
//! table, and the idle watchdog. [`Connection`] is a cheap cloneable handle
//! that talks to it over a command channel.
//!
//! ```text
//! disconnected ─connect─▶ connecting ─open─▶ connected
//!       ▲                                       │ close / idle timeout
//!       └────────────── closed ◀── closing ◀────┘
//! ```
//!
//! Inbound frames carrying a `transaction` go to the matching
//! [`Transaction`]; frames without one are routed to a session by
//! `session_id`, or surface as [`ConnectionEvent::Event`].

use std::collections::HashMap;
use std::sync::Arc;

use janus_core::{
    ConnectionState, Frame, FrameKind, JanusError, Request, ResponseError, Result, SessionId,
    Timer, TransactionId, TransportError,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, EVENT_CHANNEL_CAPACITY};
use crate::info::ServerInfo;
use crate::session::Session;
use crate::transaction::{Deadlines, Transaction, TransactionEvent, TransactionOptions};
use crate::transport::{Link, Transport, TransportSignal};

/// Connection-level notifications.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    /// The link is open and the gateway answered the info probe.
    Connected,
    /// The link is gone. Only follows a `Connected`.
    Disconnected,
    /// Transport failure, an unparseable frame, or a failed info probe.
    Error(JanusError),
    /// Out-of-band frame not addressed to a known session.
    Event(Frame),
}

/// Registry sizes, for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Current state.
    pub state: ConnectionState,
    /// Transactions awaiting an outcome.
    pub transactions: usize,
    /// Sessions with a routing entry.
    pub sessions: usize,
}

enum Command {
    Connect,
    Probe,
    Close {
        done: oneshot::Sender<()>,
    },
    Start(Transaction),
    RegisterSession {
        id: SessionId,
        route: mpsc::UnboundedSender<Frame>,
    },
    UnregisterSession {
        id: SessionId,
    },
    Info {
        reply: oneshot::Sender<Option<ServerInfo>>,
    },
    Stats {
        reply: oneshot::Sender<ConnectionStats>,
    },
}

enum Internal {
    Sent {
        id: TransactionId,
        result: std::result::Result<(), TransportError>,
    },
    Info {
        generation: u64,
        result: Result<Frame>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseCause {
    User,
    IdleTimeout,
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Notified {
    Connected,
    Disconnected,
}

/// Handle to a connection actor.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.config.url)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Spawn the actor. The connection starts `disconnected`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (internal, internal_rx) = mpsc::unbounded_channel();

        let actor = ConnectionActor {
            config: Arc::clone(&config),
            transport,
            commands: command_rx,
            internal,
            internal_rx,
            state: state_tx,
            events: events.clone(),
            link: None,
            signals: None,
            generation: 0,
            probing: false,
            transactions: HashMap::new(),
            deadlines: Deadlines::new(),
            sessions: HashMap::new(),
            idle: Timer::new(),
            notified: Notified::Disconnected,
            close_cause: None,
            close_waiters: Vec::new(),
            info: None,
        };
        drop(tokio::spawn(actor.run()));

        Self {
            commands,
            state,
            events,
            config,
        }
    }

    /// The configuration this connection runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to connection notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Start connecting. A no-op unless `disconnected`.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Connect and wait until the gateway answered the info probe.
    ///
    /// On a connection that is already `connected` but has no server info,
    /// the probe is issued again.
    pub async fn open(&self) -> Result<ServerInfo> {
        let mut events = self.subscribe();
        let mut state = self.state.clone();
        let current = *state.borrow_and_update();

        if current == ConnectionState::Connected {
            if let Some(info) = self.info().await? {
                return Ok(info);
            }
            self.send(Command::Probe)?;
        } else {
            self.connect()?;
        }

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(ConnectionEvent::Connected) => {
                        return self.info().await?.ok_or_else(|| {
                            JanusError::unexpected("info", "connected without server info")
                        });
                    }
                    Ok(ConnectionEvent::Error(e)) => return Err(e),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(closed()),
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(closed());
                    }
                    let now = *state.borrow_and_update();
                    if now == ConnectionState::Disconnected {
                        return Err(JanusError::ConnectionState { state: now });
                    }
                }
            }
        }
    }

    /// Close the link and wait until the connection is `disconnected`.
    pub async fn close(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Close { done })?;
        rx.await.map_err(|_| closed())
    }

    /// Issue `request` and wait for its outcome.
    pub async fn request(&self, request: Request, options: TransactionOptions) -> Result<Frame> {
        self.request_observed(request, options, None).await
    }

    /// Like [`request`](Self::request), also streaming the transaction's
    /// events to `observer`.
    pub async fn request_observed(
        &self,
        request: Request,
        options: TransactionOptions,
        observer: Option<mpsc::UnboundedSender<TransactionEvent>>,
    ) -> Result<Frame> {
        let (mut transaction, completion) = Transaction::new(
            &request,
            &self.config.credentials,
            options,
            self.config.request_timeout,
        );
        if let Some(observer) = observer {
            transaction.observe(observer);
        }
        self.send(Command::Start(transaction))?;
        completion.await.map_err(|_| closed())?
    }

    /// Cached server info from the last successful probe.
    pub async fn info(&self) -> Result<Option<ServerInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Info { reply })?;
        rx.await.map_err(|_| closed())
    }

    /// Registry sizes.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| closed())
    }

    /// Create a new gateway session.
    pub async fn create_session(&self) -> Result<Session> {
        let frame = self
            .request(Request::new("create"), TransactionOptions::default())
            .await?;
        let frame = expect_success(frame)?;
        let id = frame
            .data_id()
            .ok_or_else(|| JanusError::unexpected("create", "reply has no data.id"))?;
        let session = Session::spawn(self.clone(), SessionId::new(id));
        info!(session = id, "session created");
        Ok(session)
    }

    /// Reclaim an existing session after a reconnect.
    pub async fn claim_session(&self, id: SessionId) -> Result<Session> {
        let frame = self
            .request(
                Request::new("claim").with_session(id),
                TransactionOptions::default(),
            )
            .await?;
        let frame = expect_success(frame)?;
        if let Some(claimed) = frame.session_id() {
            if claimed != id {
                return Err(JanusError::unexpected(
                    "claim",
                    format!("claimed session {claimed}, asked for {id}"),
                ));
            }
        }
        info!(session = %id, "session claimed");
        Ok(Session::spawn(self.clone(), id))
    }

    /// Destroy a session remotely. Its routing entry is removed on success.
    pub async fn destroy_session(&self, id: SessionId) -> Result<()> {
        let frame = self
            .request(
                Request::new("destroy").with_session(id),
                TransactionOptions::default(),
            )
            .await?;
        let _ = expect_success(frame)?;
        self.unregister_session(id);
        info!(session = %id, "session destroyed");
        Ok(())
    }

    pub(crate) fn register_session(&self, id: SessionId, route: mpsc::UnboundedSender<Frame>) {
        let _ = self.send(Command::RegisterSession { id, route });
    }

    pub(crate) fn unregister_session(&self, id: SessionId) {
        let _ = self.send(Command::UnregisterSession { id });
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

/// Require a `success` reply; anything else becomes a [`ResponseError`].
pub(crate) fn expect_success(frame: Frame) -> Result<Frame> {
    if *frame.kind() == FrameKind::Success {
        Ok(frame)
    } else {
        Err(ResponseError::from_frame(frame).into())
    }
}

fn closed() -> JanusError {
    JanusError::Closed {
        component: "connection",
    }
}

struct ConnectionActor {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    link: Option<Link>,
    signals: Option<mpsc::UnboundedReceiver<TransportSignal>>,
    /// Bumped per link so a stale probe result is ignored.
    generation: u64,
    probing: bool,
    transactions: HashMap<TransactionId, Transaction>,
    deadlines: Deadlines,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<Frame>>,
    idle: Timer,
    notified: Notified,
    close_cause: Option<CloseCause>,
    close_waiters: Vec<oneshot::Sender<()>>,
    info: Option<ServerInfo>,
}

impl ConnectionActor {
    #[instrument(skip_all, fields(url = %self.config.url))]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                signal = next_signal(&mut self.signals) => self.on_signal(signal),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
                () = self.idle.fired() => self.on_idle_timeout(),
                id = self.deadlines.expired() => self.on_deadline(&id),
            }
        }

        debug!("all connection handles dropped");
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "connection state");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Probe => {
                if self.state() == ConnectionState::Connected
                    && self.info.is_none()
                    && !self.probing
                {
                    debug!("re-probing server info");
                    self.probe();
                }
            }
            Command::Close { done } => {
                self.close_waiters.push(done);
                self.close(CloseCause::User);
            }
            Command::Start(transaction) => self.start(transaction),
            Command::RegisterSession { id, route } => {
                let _ = self.sessions.insert(id, route);
            }
            Command::UnregisterSession { id } => {
                if self.sessions.remove(&id).is_some() {
                    debug!(session = %id, "session route removed");
                }
            }
            Command::Info { reply } => {
                let _ = reply.send(self.info.clone());
            }
            Command::Stats { reply } => {
                let _ = reply.send(ConnectionStats {
                    state: self.state(),
                    transactions: self.transactions.len(),
                    sessions: self.sessions.len(),
                });
            }
        }
    }

    fn connect(&mut self) {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            debug!(%state, "connect ignored");
            return;
        }
        info!("connecting");
        self.set_state(ConnectionState::Connecting);
        self.idle.arm(self.config.idle_timeout);
        self.generation += 1;
        self.probing = false;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        self.link = Some(self.transport.open(&self.config.url, signals));
        self.signals = Some(signal_rx);
    }

    fn close(&mut self, cause: CloseCause) {
        match self.state() {
            ConnectionState::Closing => {}
            ConnectionState::Disconnected => self.finish_close(),
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!(?cause, "closing");
                self.set_state(ConnectionState::Closing);
                self.close_cause = Some(cause);
                self.idle.disarm();
                match &self.link {
                    Some(link) => link.close(),
                    None => self.finish_close(),
                }
            }
        }
    }

    fn finish_close(&mut self) {
        let cause = self.close_cause.take().unwrap_or(CloseCause::User);
        self.idle.disarm();
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.signals = None;
        self.set_state(ConnectionState::Disconnected);

        let err = JanusError::ConnectionState {
            state: ConnectionState::Disconnected,
        };
        for (_, mut transaction) in self.transactions.drain() {
            transaction.error(err.clone(), &mut self.deadlines);
        }

        if self.notified == Notified::Connected {
            self.notified = Notified::Disconnected;
            info!(?cause, "disconnected");
            self.emit(ConnectionEvent::Disconnected);
        }
        for done in self.close_waiters.drain(..) {
            let _ = done.send(());
        }

        if cause == CloseCause::IdleTimeout && self.config.reconnect {
            info!("reconnecting after idle timeout");
            self.connect();
        }
    }

    fn on_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Open => self.on_open(),
            TransportSignal::Message(text) => self.on_message(&text),
            TransportSignal::Error(e) => {
                warn!(error = %e, "transport error");
                self.emit(ConnectionEvent::Error(e.into()));
            }
            TransportSignal::Closed => {
                self.link = None;
                self.signals = None;
                match self.state() {
                    ConnectionState::Closing => self.finish_close(),
                    ConnectionState::Connecting | ConnectionState::Connected => {
                        warn!("link closed by remote");
                        self.close_cause = Some(CloseCause::Remote);
                        self.finish_close();
                    }
                    ConnectionState::Disconnected => {}
                }
            }
        }
    }

    fn on_open(&mut self) {
        if self.state() != ConnectionState::Connecting {
            return;
        }
        self.set_state(ConnectionState::Connected);
        self.idle.arm(self.config.idle_timeout);
        if self.notified == Notified::Disconnected {
            self.probe();
        }
    }

    fn probe(&mut self) {
        self.probing = true;
        let (transaction, completion) = Transaction::new(
            &Request::new("info"),
            &self.config.credentials,
            TransactionOptions::default(),
            self.config.request_timeout,
        );
        self.start(transaction);

        let internal = self.internal.clone();
        let generation = self.generation;
        drop(tokio::spawn(async move {
            let result = completion.await.unwrap_or_else(|_| Err(closed()));
            let _ = internal.send(Internal::Info { generation, result });
        }));
    }

    fn on_message(&mut self, text: &str) {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            self.idle.arm(self.config.idle_timeout);
        }

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                self.emit(ConnectionEvent::Error(e.into()));
                return;
            }
        };
        debug!(kind = %frame.kind(), "frame received");

        if let Some(id) = frame.transaction() {
            match self.transactions.get_mut(&id) {
                Some(transaction) => {
                    transaction.response(frame, &mut self.deadlines);
                    self.evict_if_ended(&id);
                }
                None => {
                    warn!(transaction = %id, kind = %frame.kind(), "dropping frame for unknown transaction");
                }
            }
            return;
        }

        let Some(session) = frame.session_id().filter(|id| self.sessions.contains_key(id)) else {
            self.emit(ConnectionEvent::Event(frame));
            return;
        };
        let timed_out = *frame.kind() == FrameKind::Timeout;
        let delivered = self
            .sessions
            .get(&session)
            .is_some_and(|route| route.send(frame).is_ok());
        if timed_out || !delivered {
            let _ = self.sessions.remove(&session);
            info!(%session, timed_out, "session route dropped");
        }
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Sent { id, result } => {
                if let Some(transaction) = self.transactions.get_mut(&id) {
                    transaction.sent(result, &mut self.deadlines);
                    self.evict_if_ended(&id);
                }
            }
            Internal::Info { generation, result } => {
                if generation != self.generation {
                    return;
                }
                self.probing = false;
                if self.state() != ConnectionState::Connected {
                    return;
                }
                match result.and_then(ServerInfo::from_frame) {
                    Ok(info) => {
                        info!(version = info.version_string().unwrap_or("?"), "connected");
                        self.info = Some(info);
                        self.notified = Notified::Connected;
                        self.emit(ConnectionEvent::Connected);
                    }
                    Err(e) => {
                        warn!(error = %e, "info probe failed");
                        self.emit(ConnectionEvent::Error(e));
                    }
                }
            }
        }
    }

    fn on_idle_timeout(&mut self) {
        warn!(idle_timeout = ?self.config.idle_timeout, "no traffic, closing link");
        self.close(CloseCause::IdleTimeout);
    }

    fn on_deadline(&mut self, id: &TransactionId) {
        if let Some(transaction) = self.transactions.get_mut(id) {
            transaction.expire(&mut self.deadlines);
            self.evict_if_ended(id);
        }
    }

    fn start(&mut self, mut transaction: Transaction) {
        let state = self.state();
        let link = match &self.link {
            Some(link) if state == ConnectionState::Connected => link.clone(),
            _ => {
                debug!(kind = transaction.kind(), %state, "request while not connected");
                transaction.error(JanusError::ConnectionState { state }, &mut self.deadlines);
                return;
            }
        };
        if self.transactions.contains_key(transaction.id()) {
            let err = JanusError::unexpected(transaction.kind(), "duplicate transaction id");
            transaction.error(err, &mut self.deadlines);
            return;
        }
        let Some(payload) = transaction.start(&mut self.deadlines) else {
            return;
        };

        let sending = link.send(payload);
        let internal = self.internal.clone();
        let id = transaction.id().clone();
        drop(tokio::spawn(async move {
            let result = sending.await;
            let _ = internal.send(Internal::Sent { id, result });
        }));
        let _ = self.transactions.insert(transaction.id().clone(), transaction);
    }

    fn evict_if_ended(&mut self, id: &TransactionId) {
        if self.transactions.get(id).is_some_and(Transaction::is_ended) {
            let _ = self.transactions.remove(id);
        }
    }
}

async fn next_signal(signals: &mut Option<mpsc::UnboundedReceiver<TransportSignal>>) -> TransportSignal {
    match signals {
        Some(rx) => rx.recv().await.unwrap_or(TransportSignal::Closed),
        None => std::future::pending().await,
    }
}
