//! # janus-settings
//!
//! Layered configuration for the Janus gateway client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`JanusSettings::default()`]
//! 2. **User file**: `~/.janus/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `JANUS_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = janus_settings::load_settings()?;
//! println!("gateway: {}", settings.connection.url);
//! # Ok::<(), janus_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_with_env, settings_path,
};
pub use types::{ConnectionSettings, JanusSettings, SessionSettings};
