//! Transport boundary.
//!
//! A [`Transport`] opens a [`Link`] to a URL. Everything the link observes
//! (open, inbound text, errors, close) is reported as a [`TransportSignal`]
//! on a channel owned by the connection; outbound frames go through
//! [`Link::send`]. Each link gets a fresh signal channel, so signals from a
//! replaced link can never reach its successor.

use std::future::Future;

use janus_core::TransportError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// What a link reports back to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSignal {
    /// The link is ready to carry frames.
    Open,
    /// One inbound text frame.
    Message(String),
    /// A non-fatal or pre-close failure.
    Error(TransportError),
    /// The link is gone. Always the last signal.
    Closed,
}

/// Sending half of a link's signal channel.
pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

/// One outbound frame plus the writer's verdict.
#[derive(Debug)]
pub struct Outbound {
    /// Serialized frame.
    pub text: String,
    /// Resolved once the writer accepted or rejected the frame.
    pub accepted: oneshot::Sender<Result<(), TransportError>>,
}

/// Caller-side handle to an open (or opening) link.
#[derive(Clone, Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
}

/// Transport-side half of a link, consumed by the task driving the socket.
#[derive(Debug)]
pub struct LinkEnd {
    /// Frames queued by [`Link::send`], in call order.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Cancelled by [`Link::close`].
    pub shutdown: CancellationToken,
}

impl Link {
    /// Create a connected `Link` / `LinkEnd` pair.
    pub fn pair() -> (Self, LinkEnd) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        (
            Self {
                outbound: tx,
                shutdown: shutdown.clone(),
            },
            LinkEnd {
                outbound: rx,
                shutdown,
            },
        )
    }

    /// Queue `text` for sending.
    ///
    /// The frame is enqueued before this returns, so frames leave in call
    /// order. The returned future resolves when the writer has accepted the
    /// buffer; it does not wait for delivery.
    pub fn send(
        &self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let (accepted, verdict) = oneshot::channel();
        let queued = self
            .outbound
            .send(Outbound { text, accepted })
            .map_err(|_| TransportError::Closed);
        async move {
            queued?;
            verdict.await.map_err(|_| TransportError::Closed)?
        }
    }

    /// Ask the transport to shut the link down. A `Closed` signal follows.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Opens links. Implementations spawn whatever task drives the socket.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a link to `url`, reporting progress on `signals`.
    ///
    /// Must not block. Failures are reported as `Error` followed by `Closed`.
    fn open(&self, url: &str, signals: SignalSender) -> Link;
}
