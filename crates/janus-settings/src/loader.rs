//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`JanusSettings::default()`]
//! 2. If `~/.janus/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `JANUS_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::JanusSettings;

/// Resolve the path to the settings file (`~/.janus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".janus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<JanusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<JanusSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] with an injectable environment.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<JanusSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(JanusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: JanusSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `JANUS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut JanusSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `env`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_overrides<F>(settings: &mut JanusSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(env);

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = env.string("JANUS_URL") {
        settings.connection.url = v;
    }
    if let Some(v) = env.u64("JANUS_IDLE_TIMEOUT_MS", 100, 3_600_000) {
        settings.connection.idle_timeout_ms = v;
    }
    if let Some(v) = env.bool("JANUS_RECONNECT") {
        settings.connection.reconnect = v;
    }
    if let Some(v) = env.u64("JANUS_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.connection.request_timeout_ms = v;
    }
    if let Some(v) = env.string("JANUS_TOKEN") {
        settings.connection.token = Some(v);
    }
    if let Some(v) = env.string("JANUS_API_SECRET") {
        settings.connection.api_secret = Some(v);
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("JANUS_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.session.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u32("JANUS_HEARTBEAT_FAILURES", 1, 100) {
        settings.session.heartbeat_failures = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean (case-insensitive).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.0)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.0)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"connection": {"url": "ws://a", "reconnect": true}});
        let source = serde_json::json!({"connection": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["url"], "ws://b");
        assert_eq!(merged["connection"]["reconnect"], true);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load ────────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_with_env(path, no_env).unwrap();
        assert_eq!(settings, JanusSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connection": {"url": "wss://gw.example:8989", "reconnect": false}, "session": {"heartbeatFailures": 5}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.connection.url, "wss://gw.example:8989");
        assert!(!settings.connection.reconnect);
        assert_eq!(settings.session.heartbeat_failures, 5);
        assert_eq!(settings.connection.request_timeout_ms, 6000);
    }

    #[test]
    fn load_null_value_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"url": null}}"#).unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.connection.url, "ws://localhost:8188");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_invalid_value_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"heartbeatIntervalMs": 0}}"#).unwrap();

        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"url": "ws://file:8188"}}"#).unwrap();

        let env = env_from(&[("JANUS_URL", "ws://env:8188"), ("JANUS_TOKEN", "abc")]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.connection.url, "ws://env:8188");
        assert_eq!(settings.connection.token.as_deref(), Some("abc"));
    }

    // ── apply_overrides ─────────────────────────────────────────────

    #[test]
    fn overrides_all_fields() {
        let mut s = JanusSettings::default();
        apply_overrides(
            &mut s,
            env_from(&[
                ("JANUS_IDLE_TIMEOUT_MS", "100"),
                ("JANUS_RECONNECT", "off"),
                ("JANUS_REQUEST_TIMEOUT_MS", "500"),
                ("JANUS_API_SECRET", "janusrocks"),
                ("JANUS_HEARTBEAT_INTERVAL_MS", "5000"),
                ("JANUS_HEARTBEAT_FAILURES", "3"),
            ]),
        );
        assert_eq!(s.connection.idle_timeout_ms, 100);
        assert!(!s.connection.reconnect);
        assert_eq!(s.connection.request_timeout_ms, 500);
        assert_eq!(s.connection.api_secret.as_deref(), Some("janusrocks"));
        assert_eq!(s.session.heartbeat_interval_ms, 5000);
        assert_eq!(s.session.heartbeat_failures, 3);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = JanusSettings::default();
        apply_overrides(
            &mut s,
            env_from(&[
                ("JANUS_IDLE_TIMEOUT_MS", "5"),
                ("JANUS_RECONNECT", "maybe"),
                ("JANUS_HEARTBEAT_FAILURES", "0"),
                ("JANUS_TOKEN", ""),
            ]),
        );
        assert_eq!(s, JanusSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
        assert_eq!(parse_u32_range("2", 1, 100), Some(2));
        assert_eq!(parse_u32_range("101", 1, 100), None);
    }
}
