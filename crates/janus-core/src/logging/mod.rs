//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs a compact stderr subscriber for binaries and demos
//! - [`init_json_subscriber`] does the same with one JSON object per line
//! - [`test_utils`] captures events in memory so tests can assert on them
//!
//! The engine itself only emits events; it never installs a subscriber.
//! Conventional fields are `transaction`, `session`, `handle`, `state` and
//! `error`, so a filter like `RUST_LOG=janus_client=debug` traces one request
//! end to end.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` wins over `level` when set. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Like [`init_subscriber`], but formats each event as a JSON line.
pub fn init_json_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
