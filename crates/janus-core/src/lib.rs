//! # janus-core
//!
//! Foundation types for the Janus gateway client.
//!
//! This crate provides the shared vocabulary the engine is built on:
//!
//! - **Branded IDs**: `TransactionId` (UUID v7) and the numeric `SessionId` / `HandleId`
//! - **States**: connection, transaction, and session lifecycle enums
//! - **Frames**: [`Frame`] wrapper over inbound JSON with a typed [`FrameKind`] discriminator
//! - **Requests**: [`Request`] builder that returns a stamped copy instead of mutating
//! - **Errors**: [`JanusError`] taxonomy via `thiserror`, with stable machine codes
//! - **Timers**: cancellable [`Timer`] and keyed [`TimerWheel`] with `arm`/`cancel`
//! - **Logging**: subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod request;
pub mod state;
pub mod timer;

pub use errors::{JanusError, PluginError, ResponseError, Result, TransportError};
pub use frame::{Frame, FrameKind, ReplyKind};
pub use ids::{HandleId, SessionId, TransactionId};
pub use request::{Credentials, Request};
pub use state::{ConnectionState, SessionState, TransactionState};
pub use timer::{Timer, TimerWheel};
