//! Session and thought records.

use chrono::{DateTime, Utc};
use ponder_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::levels::ReasoningLevel;

/// Bytes of UTF-8 text per estimated token.
pub const BYTES_PER_TOKEN: usize = 4;

/// Approximate token count of `content`: `max(1, ceil(bytes / 4))`.
pub fn estimate_tokens(content: &str) -> u64 {
    content.len().div_ceil(BYTES_PER_TOKEN).max(1) as u64
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting thoughts.
    #[default]
    Active,
    /// Finished normally.
    Completed,
    /// Abandoned by the caller.
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One entry in a session's reasoning chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Zero-based position in the session.
    pub index: u32,
    /// Thought body.
    pub content: String,
    /// Number of in-place edits.
    pub revision: u32,
    /// Optional one-line summary of the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_summary: Option<String>,
    /// Cached [`estimate_tokens`] of `content`.
    pub token_count: u64,
    /// When the thought was first added.
    pub created_at: DateTime<Utc>,
    /// When the thought was last revised.
    pub updated_at: DateTime<Utc>,
}

/// A bounded reasoning session.
///
/// Values handed out by the cache are snapshots: mutating the live record
/// never changes a snapshot already returned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Reasoning level.
    pub level: ReasoningLevel,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Thoughts in order; `thoughts[i].index == i`.
    pub thoughts: Vec<Thought>,
    /// Planned number of thoughts.
    pub total_thoughts: u32,
    /// Sum of `token_count` over `thoughts`.
    pub tokens_used: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Query the session was opened for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Session {
    /// Number of thoughts recorded so far.
    pub fn thought_count(&self) -> u32 {
        self.thoughts.len() as u32
    }

    /// Thoughts still missing to reach the plan.
    pub fn remaining_thoughts(&self) -> u32 {
        self.total_thoughts.saturating_sub(self.thought_count())
    }

    /// Whether the session still accepts thoughts.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Tokens left in the level's per-session budget.
    pub fn token_budget_remaining(&self) -> u64 {
        self.level.token_budget().saturating_sub(self.tokens_used)
    }

    /// Last thought, if any.
    pub fn last_thought(&self) -> Option<&Thought> {
        self.thoughts.last()
    }
}
