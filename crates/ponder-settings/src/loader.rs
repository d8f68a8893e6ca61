//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PonderSettings::default()`]
//! 2. If `~/.ponder/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PONDER_*` environment variable overrides (highest priority)
//! 4. Reset any numeric limit below its minimum back to the default
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{
    DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TOTAL_TOKENS,
    DEFAULT_SESSION_TTL_MS, MIN_MAX_TOTAL_TOKENS, MIN_SESSION_TTL_MS, PonderSettings,
};

/// Session TTL override, in milliseconds.
pub const ENV_SESSION_TTL_MS: &str = "PONDER_SESSION_TTL_MS";
/// Live session cap override.
pub const ENV_MAX_SESSIONS: &str = "PONDER_MAX_SESSIONS";
/// Aggregate token cap override.
pub const ENV_MAX_TOTAL_TOKENS: &str = "PONDER_MAX_TOTAL_TOKENS";
/// Concurrent task cap override.
pub const ENV_MAX_CONCURRENT_TASKS: &str = "PONDER_MAX_CONCURRENT_TASKS";
/// Log filter override.
pub const ENV_LOG_LEVEL: &str = "PONDER_LOG_LEVEL";

/// Resolve the path to the settings file (`~/.ponder/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ponder").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PonderSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PonderSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    sanitize(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<PonderSettings> {
    let defaults = serde_json::to_value(PonderSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply overrides read through `lookup` (normally `std::env::var`).
///
/// Values that are not integers or fall below the documented minimum are
/// ignored, leaving the file/default value in place.
pub fn apply_overrides<F>(settings: &mut PonderSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read_u64(&lookup, ENV_SESSION_TTL_MS, MIN_SESSION_TTL_MS) {
        settings.session.ttl_ms = v;
    }
    if let Some(v) = read_usize(&lookup, ENV_MAX_SESSIONS, 1) {
        settings.session.max_sessions = v;
    }
    if let Some(v) = read_u64(&lookup, ENV_MAX_TOTAL_TOKENS, MIN_MAX_TOTAL_TOKENS) {
        settings.session.max_total_tokens = v;
    }
    if let Some(v) = read_usize(&lookup, ENV_MAX_CONCURRENT_TASKS, 1) {
        settings.tasks.max_concurrent = v;
    }
    if let Some(v) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
        settings.logging.level = v;
    }
}

/// Reset limits below their minimum (from the settings file) to defaults.
pub fn sanitize(settings: &mut PonderSettings) {
    if settings.session.ttl_ms < MIN_SESSION_TTL_MS {
        debug!(value = settings.session.ttl_ms, "ttlMs below minimum, using default");
        settings.session.ttl_ms = DEFAULT_SESSION_TTL_MS;
    }
    if settings.session.max_sessions == 0 {
        settings.session.max_sessions = DEFAULT_MAX_SESSIONS;
    }
    if settings.session.max_total_tokens < MIN_MAX_TOTAL_TOKENS {
        debug!(
            value = settings.session.max_total_tokens,
            "maxTotalTokens below minimum, using default"
        );
        settings.session.max_total_tokens = DEFAULT_MAX_TOTAL_TOKENS;
    }
    if settings.tasks.max_concurrent == 0 {
        settings.tasks.max_concurrent = DEFAULT_MAX_CONCURRENT_TASKS;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` no smaller than `min`.
pub fn parse_u64_min(val: &str, min: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min).then_some(n)
}

/// Parse a string as a `usize` no smaller than `min`.
pub fn parse_usize_min(val: &str, min: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min).then_some(n)
}

fn read_u64<F>(lookup: &F, name: &str, min: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_u64_min(&val, min);
    if result.is_none() {
        debug!(key = name, value = %val, "invalid integer env var, keeping default");
    }
    result
}

fn read_usize<F>(lookup: &F, name: &str, min: usize) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_usize_min(&val, min);
    if result.is_none() {
        debug!(key = name, value = %val, "invalid integer env var, keeping default");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"session": {"ttlMs": 1, "maxSessions": 2}});
        let source = serde_json::json!({"session": {"ttlMs": 9}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["session"]["ttlMs"], 9);
        assert_eq!(merged["session"]["maxSessions"], 2);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, PonderSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"maxSessions": 12}, "tasks": {"maxConcurrent": 2}}"#)
            .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.session.max_sessions, 12);
        assert_eq!(settings.tasks.max_concurrent, 2);
        assert_eq!(settings.session.ttl_ms, DEFAULT_SESSION_TTL_MS);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn sanitize_resets_values_below_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"session": {"ttlMs": 5, "maxSessions": 0, "maxTotalTokens": 10}, "tasks": {"maxConcurrent": 0}}"#,
        )
        .unwrap();

        let mut settings = load_file_layer(&path).unwrap();
        sanitize(&mut settings);
        assert_eq!(settings.session.ttl_ms, DEFAULT_SESSION_TTL_MS);
        assert_eq!(settings.session.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(settings.session.max_total_tokens, DEFAULT_MAX_TOTAL_TOKENS);
        assert_eq!(settings.tasks.max_concurrent, DEFAULT_MAX_CONCURRENT_TASKS);
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn valid_overrides_apply() {
        let mut settings = PonderSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                (ENV_SESSION_TTL_MS, "60000"),
                (ENV_MAX_SESSIONS, "3"),
                (ENV_MAX_TOTAL_TOKENS, "5000"),
                (ENV_MAX_CONCURRENT_TASKS, "8"),
                (ENV_LOG_LEVEL, "debug"),
            ]),
        );
        assert_eq!(settings.session.ttl_ms, 60_000);
        assert_eq!(settings.session.max_sessions, 3);
        assert_eq!(settings.session.max_total_tokens, 5_000);
        assert_eq!(settings.tasks.max_concurrent, 8);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_keep_defaults() {
        let mut settings = PonderSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                (ENV_SESSION_TTL_MS, "999"),
                (ENV_MAX_SESSIONS, "lots"),
                (ENV_MAX_TOTAL_TOKENS, "12.5"),
                (ENV_MAX_CONCURRENT_TASKS, "0"),
                (ENV_LOG_LEVEL, "  "),
            ]),
        );
        assert_eq!(settings, PonderSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u64_min_bounds() {
        assert_eq!(parse_u64_min("1000", 1000), Some(1000));
        assert_eq!(parse_u64_min(" 2500 ", 1000), Some(2500));
        assert_eq!(parse_u64_min("999", 1000), None);
        assert_eq!(parse_u64_min("-1", 0), None);
        assert_eq!(parse_u64_min("", 0), None);
    }

    #[test]
    fn parse_usize_min_bounds() {
        assert_eq!(parse_usize_min("1", 1), Some(1));
        assert_eq!(parse_usize_min("0", 1), None);
        assert_eq!(parse_usize_min("1e3", 1), None);
    }
}
