//! Per-request correlation state machine.
//!
//! A [`Transaction`] is owned by the connection actor and driven entirely
//! from its task, so it is a plain synchronous struct. It never sends
//! anything itself: [`start`](Transaction::start) hands back the stamped
//! payload and the connection writes it to the link.
//!
//! States move `new → started → receiving → ended` and never go back. The
//! caller's completion channel receives exactly one outcome, at the `ended`
//! transition; observers get the full typed event stream.

use std::time::Duration;

use janus_core::{
    Credentials, Frame, JanusError, ReplyKind, Request, ResponseError, Result, TimerWheel,
    TransactionId, TransactionState, TransportError,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Deadlines of every in-flight transaction of one connection.
pub type Deadlines = TimerWheel<TransactionId>;

/// How an `ack` frame affects the transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// No ack expected. One that arrives anyway is logged and ignored.
    #[default]
    Unexpected,
    /// Both an ack and a terminal result must arrive, in either order.
    Required,
    /// The ack is the terminal result (`keepalive`, `trickle`).
    Final,
}

/// Per-request options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Ack handling.
    pub ack: AckMode,
    /// Deadline override; `None` uses the connection default.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    /// Options for a request answered by ack and result.
    pub fn ack_required() -> Self {
        Self {
            ack: AckMode::Required,
            timeout: None,
        }
    }

    /// Options for a request answered by a bare ack.
    pub fn ack_final() -> Self {
        Self {
            ack: AckMode::Final,
            timeout: None,
        }
    }

    /// Override the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether an ack is required before the transaction may end.
    pub fn is_ack_required(&self) -> bool {
        self.ack == AckMode::Required
    }
}

/// Observable progress of a transaction.
#[derive(Clone, Debug)]
pub enum TransactionEvent {
    /// The link accepted the payload.
    Sent,
    /// An expected ack arrived. `late` when the result came first.
    Ack {
        /// The ack followed the terminal result.
        late: bool,
    },
    /// A terminal result arrived.
    Response(Frame),
    /// The transaction ended.
    End,
    /// The transaction failed. Emitted after `End`.
    Error(JanusError),
}

/// Receives the single outcome of a transaction.
pub type Completion = oneshot::Receiver<Result<Frame>>;

/// One request/response exchange.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    kind: String,
    payload: Option<String>,
    ack: AckMode,
    timeout: Duration,
    state: TransactionState,
    ack_received: bool,
    response_received: bool,
    late_ack: bool,
    outcome: Option<Result<Frame>>,
    completion: Option<oneshot::Sender<Result<Frame>>>,
    observers: Vec<mpsc::UnboundedSender<TransactionEvent>>,
}

impl Transaction {
    /// Bind `request` to a fresh id and stamp it with `credentials`.
    pub fn new(
        request: &Request,
        credentials: &Credentials,
        options: TransactionOptions,
        default_timeout: Duration,
    ) -> (Self, Completion) {
        Self::with_id(TransactionId::new(), request, credentials, options, default_timeout)
    }

    /// Like [`new`](Self::new) with a caller-chosen id.
    pub fn with_id(
        id: TransactionId,
        request: &Request,
        credentials: &Credentials,
        options: TransactionOptions,
        default_timeout: Duration,
    ) -> (Self, Completion) {
        let payload = request.stamped(&id, credentials).to_string();
        let (tx, rx) = oneshot::channel();
        let transaction = Self {
            id,
            kind: request.kind().to_owned(),
            payload: Some(payload),
            ack: options.ack,
            timeout: options.timeout.unwrap_or(default_timeout),
            state: TransactionState::New,
            ack_received: false,
            response_received: false,
            late_ack: false,
            outcome: None,
            completion: Some(tx),
            observers: Vec::new(),
        };
        (transaction, rx)
    }

    /// Attach an observer for every subsequent event.
    pub fn observe(&mut self, observer: mpsc::UnboundedSender<TransactionEvent>) {
        self.observers.push(observer);
    }

    /// Correlation id.
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Request kind, for diagnostics.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether the transaction has ended.
    pub fn is_ended(&self) -> bool {
        self.state == TransactionState::Ended
    }

    /// Whether an expected ack was received.
    pub fn is_ack_received(&self) -> bool {
        self.ack_received
    }

    /// Whether a terminal result was received.
    pub fn is_response_received(&self) -> bool {
        self.response_received
    }

    /// Whether the ack arrived after the terminal result.
    pub fn is_late_ack(&self) -> bool {
        self.late_ack
    }

    /// Configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Move to `started`, arm the deadline, and return the payload to send.
    ///
    /// From any other state the transaction fails with
    /// `InvalidTransactionState` and `None` is returned.
    pub fn start(&mut self, deadlines: &mut Deadlines) -> Option<String> {
        if self.state != TransactionState::New {
            self.error(self.invalid_state(), deadlines);
            return None;
        }
        self.state = TransactionState::Started;
        deadlines.arm(self.id.clone(), self.timeout);
        debug!(transaction = %self.id, kind = %self.kind, "transaction started");
        self.payload.take()
    }

    /// Record the link's verdict on the payload.
    pub fn sent(&mut self, result: std::result::Result<(), TransportError>, deadlines: &mut Deadlines) {
        if self.is_ended() {
            return;
        }
        match result {
            Ok(()) => self.emit(&TransactionEvent::Sent),
            Err(e) => {
                warn!(transaction = %self.id, kind = %self.kind, error = %e, "send failed");
                self.error(e.into(), deadlines);
            }
        }
    }

    /// Feed a frame carrying this transaction's id.
    pub fn response(&mut self, frame: Frame, deadlines: &mut Deadlines) {
        if !matches!(
            self.state,
            TransactionState::Started | TransactionState::Receiving
        ) {
            self.error(self.invalid_state(), deadlines);
            return;
        }

        let reply = frame.kind().reply_kind();
        if reply == ReplyKind::Ack && self.ack == AckMode::Unexpected {
            warn!(transaction = %self.id, kind = %self.kind, "ignoring unexpected ack");
            return;
        }
        self.state = TransactionState::Receiving;

        match reply {
            ReplyKind::Error => {
                let err = ResponseError::from_frame(frame);
                debug!(transaction = %self.id, code = ?err.code, "error reply");
                self.error(err.into(), deadlines);
            }
            ReplyKind::Ack if self.ack == AckMode::Final => self.result(frame, deadlines),
            ReplyKind::Ack => {
                self.ack_received = true;
                if self.response_received {
                    self.late_ack = true;
                    debug!(transaction = %self.id, "late ack");
                    self.emit(&TransactionEvent::Ack { late: true });
                    self.end(deadlines);
                } else {
                    self.emit(&TransactionEvent::Ack { late: false });
                    deadlines.arm(self.id.clone(), self.timeout);
                }
            }
            ReplyKind::Terminal => self.result(frame, deadlines),
        }
    }

    fn result(&mut self, frame: Frame, deadlines: &mut Deadlines) {
        self.response_received = true;
        self.emit(&TransactionEvent::Response(frame.clone()));
        self.outcome = Some(Ok(frame));
        if self.ack != AckMode::Required || self.ack_received {
            self.end(deadlines);
        } else {
            deadlines.arm(self.id.clone(), self.timeout);
        }
    }

    /// The deadline passed.
    pub fn expire(&mut self, deadlines: &mut Deadlines) {
        if !matches!(
            self.state,
            TransactionState::Started | TransactionState::Receiving
        ) {
            return;
        }
        warn!(transaction = %self.id, kind = %self.kind, timeout = ?self.timeout, "transaction timed out");
        let err = JanusError::TransactionTimeout {
            id: self.id.clone(),
            timeout: self.timeout,
        };
        self.error(err, deadlines);
    }

    /// Finish the transaction. Only the first call has any effect.
    pub fn end(&mut self, deadlines: &mut Deadlines) {
        if self.is_ended() {
            return;
        }
        let _ = deadlines.cancel(&self.id);
        self.state = TransactionState::Ended;
        self.emit(&TransactionEvent::End);

        let outcome = self.outcome.take().unwrap_or_else(|| {
            Err(JanusError::unexpected(
                self.kind.clone(),
                "transaction ended without a result",
            ))
        });
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(outcome);
        }
        debug!(transaction = %self.id, kind = %self.kind, "transaction ended");
    }

    /// Fail with `err`: record it as the outcome, end, then emit `Error`.
    pub fn error(&mut self, err: JanusError, deadlines: &mut Deadlines) {
        if !self.is_ended() {
            self.outcome = Some(Err(err.clone()));
        }
        self.end(deadlines);
        self.emit(&TransactionEvent::Error(err));
    }

    fn invalid_state(&self) -> JanusError {
        JanusError::InvalidTransactionState {
            id: self.id.clone(),
            state: self.state,
        }
    }

    fn emit(&mut self, event: &TransactionEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    struct Harness {
        tx: Transaction,
        completion: Completion,
        events: mpsc::UnboundedReceiver<TransactionEvent>,
        deadlines: Deadlines,
    }

    fn harness(options: TransactionOptions) -> Harness {
        let (mut tx, completion) = Transaction::with_id(
            TransactionId::from("t-1"),
            &Request::new("message"),
            &Credentials::none(),
            options,
            Duration::from_millis(500),
        );
        let (obs, events) = mpsc::unbounded_channel();
        tx.observe(obs);
        Harness {
            tx,
            completion,
            events,
            deadlines: Deadlines::new(),
        }
    }

    fn frame(kind: &str) -> Frame {
        Frame::from_value(json!({"janus": kind, "transaction": "t-1"})).unwrap()
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<TransactionEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            out.push(match ev {
                TransactionEvent::Sent => "sent".to_owned(),
                TransactionEvent::Ack { late } => format!("ack(late={late})"),
                TransactionEvent::Response(f) => format!("response({})", f.kind()),
                TransactionEvent::End => "end".to_owned(),
                TransactionEvent::Error(e) => format!("error({})", e.code()),
            });
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn start_returns_stamped_payload_and_arms_deadline() {
        let mut h = harness(TransactionOptions::default());
        let payload = h.tx.start(&mut h.deadlines).unwrap();
        let v: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["transaction"], "t-1");
        assert_eq!(v["janus"], "message");
        assert_eq!(h.tx.state(), TransactionState::Started);
        assert!(h.deadlines.is_armed(h.tx.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_fails_through_completion() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        assert!(h.tx.start(&mut h.deadlines).is_none());
        assert!(h.tx.is_ended());
        assert_matches!(
            h.completion.await.unwrap(),
            Err(JanusError::InvalidTransactionState { state: TransactionState::Started, .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_without_ack() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.sent(Ok(()), &mut h.deadlines);
        h.tx.response(frame("success"), &mut h.deadlines);

        assert!(h.tx.is_ended());
        assert!(h.deadlines.is_empty());
        assert_eq!(drain(&mut h.events), ["sent", "response(success)", "end"]);
        assert_eq!(h.completion.await.unwrap().unwrap().kind().as_str(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn ack_then_result() {
        let mut h = harness(TransactionOptions::ack_required());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("ack"), &mut h.deadlines);
        assert_eq!(h.tx.state(), TransactionState::Receiving);
        assert!(h.deadlines.is_armed(h.tx.id()));

        h.tx.response(frame("event"), &mut h.deadlines);
        assert!(h.tx.is_ended());
        assert!(!h.tx.is_late_ack());
        assert_eq!(drain(&mut h.events), ["ack(late=false)", "response(event)", "end"]);
        assert!(h.completion.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn result_then_late_ack() {
        let mut h = harness(TransactionOptions::ack_required());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("event"), &mut h.deadlines);
        assert_eq!(h.tx.state(), TransactionState::Receiving);
        assert!(h.tx.is_response_received());
        assert_eq!(drain(&mut h.events), ["response(event)"]);

        h.tx.response(frame("ack"), &mut h.deadlines);
        assert!(h.tx.is_ended());
        assert!(h.tx.is_late_ack());
        assert_eq!(drain(&mut h.events), ["ack(late=true)", "end"]);
        assert_eq!(h.completion.await.unwrap().unwrap().kind().as_str(), "event");
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_ack_is_ignored() {
        let (logs, _guard) = janus_core::logging::capture_logs();
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("ack"), &mut h.deadlines);

        assert_eq!(h.tx.state(), TransactionState::Started);
        assert!(!h.tx.is_ack_received());
        assert!(drain(&mut h.events).is_empty());
        assert!(logs.has_message("unexpected ack"));
    }

    #[tokio::test(start_paused = true)]
    async fn final_ack_completes() {
        let mut h = harness(TransactionOptions::ack_final());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("ack"), &mut h.deadlines);
        assert!(h.tx.is_ended());
        assert_eq!(drain(&mut h.events), ["response(ack)", "end"]);
        assert!(h.completion.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_short_circuits() {
        let mut h = harness(TransactionOptions::ack_required());
        let _ = h.tx.start(&mut h.deadlines);
        let err = Frame::from_value(json!({
            "janus": "error",
            "transaction": "t-1",
            "error": {"code": 490, "reason": "Bad request"}
        }))
        .unwrap();
        h.tx.response(err, &mut h.deadlines);

        assert!(h.tx.is_ended());
        assert_eq!(drain(&mut h.events), ["end", "error(RESPONSE_ERROR)"]);
        let res = h.completion.await.unwrap();
        assert_matches!(res, Err(JanusError::Response(ResponseError { code: Some(490), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_fails_with_configured_timeout() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);

        let start = tokio::time::Instant::now();
        let expired = h.deadlines.expired().await;
        assert_eq!(&expired, h.tx.id());
        assert!(start.elapsed() >= Duration::from_millis(500));

        h.tx.expire(&mut h.deadlines);
        assert!(h.tx.is_ended());
        assert_matches!(
            h.completion.await.unwrap(),
            Err(JanusError::TransactionTimeout { timeout, .. }) if timeout == Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn end_is_idempotent() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("success"), &mut h.deadlines);
        h.tx.end(&mut h.deadlines);
        h.tx.end(&mut h.deadlines);
        assert_eq!(drain(&mut h.events), ["response(success)", "end"]);
    }

    #[tokio::test(start_paused = true)]
    async fn response_after_end_reports_invalid_state() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.response(frame("success"), &mut h.deadlines);
        let _ = drain(&mut h.events);

        h.tx.response(frame("success"), &mut h.deadlines);
        assert_eq!(drain(&mut h.events), ["error(INVALID_TRANSACTION_STATE)"]);
        assert!(h.completion.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn response_before_start_is_invalid() {
        let mut h = harness(TransactionOptions::default());
        h.tx.response(frame("success"), &mut h.deadlines);
        assert!(h.tx.is_ended());
        assert_matches!(
            h.completion.await.unwrap(),
            Err(JanusError::InvalidTransactionState { state: TransactionState::New, .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_ends_immediately() {
        let mut h = harness(TransactionOptions::default());
        let _ = h.tx.start(&mut h.deadlines);
        h.tx.sent(Err(TransportError::Closed), &mut h.deadlines);
        assert!(h.tx.is_ended());
        assert!(h.deadlines.is_empty());
        assert_matches!(h.completion.await.unwrap(), Err(JanusError::Transport(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_rearms_deadline() {
        let mut h = harness(TransactionOptions::ack_required());
        let _ = h.tx.start(&mut h.deadlines);
        tokio::time::sleep(Duration::from_millis(400)).await;
        h.tx.response(frame("ack"), &mut h.deadlines);

        let start = tokio::time::Instant::now();
        let _ = h.deadlines.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
