//! Session actor.
//!
//! A session is a server-side execution context that the gateway reclaims
//! unless it sees traffic. The actor keeps it alive with periodic
//! `keepalive` requests, counts consecutive failures, and declares the
//! session dead once the threshold is reached. It also owns the handle
//! registry and fans routed frames out to handles by `sender`.

use std::collections::HashMap;
use std::sync::Arc;

use janus_core::{
    ConnectionState, Frame, FrameKind, HandleId, JanusError, Request, Result, SessionId,
    SessionState, Timer,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::{EVENT_CHANNEL_CAPACITY, SessionConfig};
use crate::connection::{Connection, expect_success};
use crate::handle::{Handle, HandleShared};
use crate::transaction::TransactionOptions;

/// Session-level notifications.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Outcome of one heartbeat.
    KeepAlive(bool),
    /// The session is dead. Sent at most once.
    Timeout,
    /// Routed frame not addressed to a registered handle.
    Event(Frame),
}

enum Command {
    Touch,
    Register(Arc<HandleShared>),
    Unregister(HandleId),
    KeepAlive { reply: oneshot::Sender<Result<()>> },
    Stop { done: oneshot::Sender<()> },
    HandleCount { reply: oneshot::Sender<usize> },
}

/// Handle to a session actor.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    connection: Connection,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Register a route for `id` on `connection` and spawn the actor.
    pub(crate) fn spawn(connection: Connection, id: SessionId) -> Self {
        let config = connection.config().session;
        let alive = connection.state() == ConnectionState::Connected;
        let initial = if alive {
            SessionState::Alive
        } else {
            SessionState::Dead
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (route, frames) = mpsc::unbounded_channel();
        let (heartbeats, heartbeat_rx) = mpsc::unbounded_channel();

        if alive {
            connection.register_session(id, route);
        }

        let mut heartbeat = Timer::new();
        if alive {
            heartbeat.arm(config.heartbeat_interval);
        }
        let actor = SessionActor {
            id,
            config,
            connection: connection.clone(),
            commands: command_rx,
            frames,
            heartbeats,
            heartbeat_rx,
            state: state_tx,
            events: events.clone(),
            heartbeat,
            in_flight: false,
            failures: 0,
            waiters: Vec::new(),
            timed_out: false,
            handles: HashMap::new(),
        };
        drop(tokio::spawn(actor.run()));

        Self {
            id,
            commands,
            state,
            events,
            connection,
        }
    }

    /// Server-assigned id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The connection this session lives on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Issue `request` within this session. Restarts the heartbeat interval.
    pub async fn request(&self, request: Request, options: TransactionOptions) -> Result<Frame> {
        let _ = self.commands.send(Command::Touch);
        self.connection
            .request(request.with_session(self.id), options)
            .await
    }

    /// Attach to `plugin` and register the resulting handle.
    pub async fn attach(&self, plugin: &str, opaque_id: Option<&str>) -> Result<Handle> {
        let request = Request::new("attach")
            .with_field("plugin", plugin)
            .with_optional_field("opaque_id", opaque_id);
        let frame = expect_success(self.request(request, TransactionOptions::default()).await?)?;
        let id = frame
            .data_id()
            .map(HandleId::new)
            .ok_or_else(|| JanusError::unexpected("attach", "reply has no data.id"))?;

        let shared = Arc::new(HandleShared::new(
            id,
            plugin.to_owned(),
            opaque_id.map(str::to_owned),
        ));
        self.send(Command::Register(Arc::clone(&shared)))?;
        info!(session = %self.id, handle = %id, plugin, "attached");
        Ok(Handle::new(shared, self.clone()))
    }

    /// Detach handle `id`. It is unregistered whatever the gateway answers.
    pub async fn detach(&self, id: HandleId) -> Result<()> {
        let outcome = self
            .request(
                Request::new("detach").with_handle(id),
                TransactionOptions::default(),
            )
            .await
            .and_then(expect_success);
        let _ = self.commands.send(Command::Unregister(id));
        match &outcome {
            Ok(_) => info!(session = %self.id, handle = %id, "detached"),
            Err(e) => warn!(session = %self.id, handle = %id, error = %e, "detach failed"),
        }
        outcome.map(|_| ())
    }

    /// Send one heartbeat now and wait for its outcome.
    pub async fn keepalive(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::KeepAlive { reply })?;
        rx.await.map_err(|_| closed())?
    }

    /// Stop the heartbeat and destroy the session on the gateway.
    ///
    /// The routing entry is removed whatever the gateway answers.
    pub async fn destroy(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Stop { done })?;
        rx.await.map_err(|_| closed())?;

        let outcome = self.connection.destroy_session(self.id).await;
        self.connection.unregister_session(self.id);
        outcome
    }

    /// Number of registered handles.
    pub async fn handle_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HandleCount { reply })?;
        rx.await.map_err(|_| closed())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

fn closed() -> JanusError {
    JanusError::Closed {
        component: "session",
    }
}

struct SessionActor {
    id: SessionId,
    config: SessionConfig,
    connection: Connection,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedReceiver<Frame>,
    heartbeats: mpsc::UnboundedSender<Result<Frame>>,
    heartbeat_rx: mpsc::UnboundedReceiver<Result<Frame>>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    heartbeat: Timer,
    in_flight: bool,
    failures: u32,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    timed_out: bool,
    handles: HashMap<HandleId, Arc<HandleShared>>,
}

impl SessionActor {
    #[instrument(skip_all, fields(session = %self.id))]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(frame) = self.frames.recv() => self.on_frame(frame),
                Some(result) = self.heartbeat_rx.recv() => self.on_heartbeat(result),
                () = self.heartbeat.fired() => self.beat(),
            }
        }
        debug!("all session handles dropped");
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "session state");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Touch => {
                if self.state() != SessionState::Dead {
                    self.heartbeat.arm(self.config.heartbeat_interval);
                }
            }
            Command::Register(handle) => {
                let _ = self.handles.insert(handle.id(), handle);
            }
            Command::Unregister(id) => {
                let _ = self.handles.remove(&id);
            }
            Command::KeepAlive { reply } => {
                if self.state() == SessionState::Dead {
                    let _ = reply.send(Err(closed()));
                    return;
                }
                self.waiters.push(reply);
                self.beat();
            }
            Command::Stop { done } => {
                self.heartbeat.disarm();
                self.set_state(SessionState::Dead);
                let _ = done.send(());
            }
            Command::HandleCount { reply } => {
                let _ = reply.send(self.handles.len());
            }
        }
    }

    fn beat(&mut self) {
        if self.state() == SessionState::Dead {
            return;
        }
        if self.in_flight {
            self.heartbeat.arm(self.config.heartbeat_interval);
            return;
        }
        self.in_flight = true;
        debug!("keepalive");

        let connection = self.connection.clone();
        let request = Request::new("keepalive").with_session(self.id);
        let results = self.heartbeats.clone();
        drop(tokio::spawn(async move {
            let result = connection
                .request(request, TransactionOptions::ack_final())
                .await;
            let _ = results.send(result);
        }));
    }

    fn on_heartbeat(&mut self, result: Result<Frame>) {
        self.in_flight = false;
        if self.state() == SessionState::Dead {
            self.reply_waiters(&Err(closed()));
            return;
        }

        let outcome = result.map(|_| ());
        match &outcome {
            Ok(()) => {
                self.failures = 0;
                self.set_state(SessionState::Alive);
                self.emit(SessionEvent::KeepAlive(true));
            }
            Err(e) => {
                self.failures += 1;
                warn!(failures = self.failures, threshold = self.config.heartbeat_failures, error = %e, "keepalive failed");
                if self.failures >= self.config.heartbeat_failures {
                    self.reply_waiters(&outcome);
                    self.die();
                    return;
                }
                self.set_state(SessionState::Dying);
                self.emit(SessionEvent::KeepAlive(false));
            }
        }
        self.reply_waiters(&outcome);
        self.heartbeat.arm(self.config.heartbeat_interval);
    }

    fn die(&mut self) {
        warn!("session dead after repeated keepalive failures");
        self.heartbeat.disarm();
        self.set_state(SessionState::Dead);
        self.emit(SessionEvent::KeepAlive(false));

        let connection = self.connection.clone();
        let id = self.id;
        drop(tokio::spawn(async move {
            if let Err(e) = connection
                .request(
                    Request::new("destroy").with_session(id),
                    TransactionOptions::default(),
                )
                .await
            {
                debug!(session = %id, error = %e, "best-effort destroy failed");
            }
        }));

        self.time_out();
        self.connection.unregister_session(self.id);
    }

    fn time_out(&mut self) {
        if !self.timed_out {
            self.timed_out = true;
            self.emit(SessionEvent::Timeout);
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        if *frame.kind() == FrameKind::Timeout {
            info!("gateway timed out the session");
            self.heartbeat.disarm();
            self.set_state(SessionState::Dead);
            self.time_out();
            return;
        }
        match frame.sender().and_then(|id| self.handles.get(&id)) {
            Some(handle) => handle.dispatch(frame),
            None => self.emit(SessionEvent::Event(frame)),
        }
    }

    fn reply_waiters(&mut self, outcome: &Result<()>) {
        for reply in self.waiters.drain(..) {
            let _ = reply.send(outcome.clone());
        }
    }
}
