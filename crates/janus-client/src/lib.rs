//! # janus-client
//!
//! Client engine for the Janus gateway control API.
//!
//! - [`Transaction`]: per-request correlation state machine (ack and result
//!   in either order, deadline, exactly-once completion)
//! - [`Connection`]: actor owning the link, frame dispatch, idle watchdog,
//!   and reconnect
//! - [`Session`]: actor running the heartbeat and routing events to handles
//! - [`Handle`]: one attached plugin instance
//! - [`WsTransport`]: WebSocket transport; [`Transport`] is the seam for
//!   others
//!
//! ```no_run
//! # async fn demo() -> janus_core::Result<()> {
//! use std::sync::Arc;
//! use janus_client::{ClientConfig, Connection, WsTransport};
//!
//! let conn = Connection::new(ClientConfig::new("ws://localhost:8188"), Arc::new(WsTransport::new()));
//! let info = conn.open().await?;
//! let session = conn.create_session().await?;
//! let handle = session.attach("janus.plugin.echotest", None).await?;
//! handle.dispose().await?;
//! session.destroy().await?;
//! conn.close().await?;
//! # drop(info);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod handle;
pub mod info;
pub mod plugin;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;
pub mod transport;
pub mod ws;

pub use config::{ClientConfig, SessionConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionStats};
pub use handle::{Handle, HandleEvent, MediaState};
pub use info::ServerInfo;
pub use plugin::PluginResponse;
pub use session::{Session, SessionEvent};
pub use transaction::{AckMode, Completion, Transaction, TransactionEvent, TransactionOptions};
pub use transport::{Link, Transport, TransportSignal};
pub use ws::WsTransport;
