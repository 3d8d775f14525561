//! WebSocket transport over `tokio-tungstenite`.
//!
//! The handshake offers the `janus-protocol` subprotocol. One task per link
//! owns the socket: it writes queued frames, forwards inbound text frames,
//! and reports `Closed` exactly once when it exits.

use futures::{SinkExt, StreamExt};
use janus_core::TransportError;
use janus_core::constants::PROTOCOL;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::transport::{Link, LinkEnd, Outbound, SignalSender, Transport, TransportSignal};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create the transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, signals: SignalSender) -> Link {
        let (link, end) = Link::pair();
        drop(tokio::spawn(run_link(url.to_owned(), end, signals)));
        link
    }
}

async fn run_link(url: String, end: LinkEnd, signals: SignalSender) {
    let LinkEnd {
        mut outbound,
        shutdown,
    } = end;

    let ws = tokio::select! {
        () = shutdown.cancelled() => {
            debug!(%url, "link closed before it opened");
            let _ = signals.send(TransportSignal::Closed);
            return;
        }
        res = dial(&url) => match res {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%url, error = %e, "websocket connect failed");
                let _ = signals.send(TransportSignal::Error(e));
                let _ = signals.send(TransportSignal::Closed);
                return;
            }
        },
    };

    info!(%url, "websocket open");
    let _ = signals.send(TransportSignal::Open);
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(%url, "closing websocket");
                if let Err(e) = ws_tx.close().await {
                    debug!(error = %e, "websocket close handshake failed");
                }
                break;
            }
            out = outbound.recv() => {
                let Some(Outbound { text, accepted }) = out else {
                    let _ = ws_tx.close().await;
                    break;
                };
                let res = ws_tx
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| TransportError::Send(e.to_string()));
                let failed = res.is_err();
                let _ = accepted.send(res);
                if failed {
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = signals.send(TransportSignal::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = signals.send(TransportSignal::Message(text));
                    }
                    Err(e) => {
                        let _ = signals.send(TransportSignal::Error(TransportError::Malformed(
                            e.to_string(),
                        )));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "remote closed websocket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = signals.send(TransportSignal::Error(TransportError::Socket(
                        e.to_string(),
                    )));
                    break;
                }
                None => break,
            },
        }
    }

    info!(%url, "websocket closed");
    let _ = signals.send(TransportSignal::Closed);
}

async fn dial(url: &str) -> Result<WsStream, TransportError> {
    let connect_err = |reason: String| TransportError::Connect {
        url: url.to_owned(),
        reason,
    };
    let mut request = url
        .into_client_request()
        .map_err(|e| connect_err(e.to_string()))?;
    let _ = request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(PROTOCOL));
    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    Ok(ws)
}
