//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial settings file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

/// Default session time-to-live: 30 minutes.
pub const DEFAULT_SESSION_TTL_MS: u64 = 1_800_000;
/// Smallest accepted session TTL.
pub const MIN_SESSION_TTL_MS: u64 = 1_000;
/// Default cap on live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;
/// Default cap on tokens held across all sessions.
pub const DEFAULT_MAX_TOTAL_TOKENS: u64 = 2_000_000;
/// Smallest accepted aggregate token cap.
pub const MIN_MAX_TOTAL_TOKENS: u64 = 1_000;
/// Default number of concurrently running reasoning tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PonderSettings {
    /// Session store limits.
    pub session: SessionSettings,
    /// Long-running task limits.
    pub tasks: TaskSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Session store limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Idle time after which a session expires, in milliseconds.
    pub ttl_ms: u64,
    /// Maximum number of live sessions before the oldest is evicted.
    pub max_sessions: usize,
    /// Maximum tokens held across all sessions before eviction kicks in.
    pub max_total_tokens: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_SESSION_TTL_MS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_total_tokens: DEFAULT_MAX_TOTAL_TOKENS,
        }
    }
}

/// Long-running task limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSettings {
    /// Maximum number of reasoning tasks running at once.
    pub max_concurrent: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
