//! Bounded session summaries for resource listings.

use chrono::{DateTime, Utc};
use ponder_core::SessionId;
use ponder_core::text::truncate;
use serde::{Deserialize, Serialize};

use crate::levels::ReasoningLevel;
use crate::model::{Session, SessionStatus};

/// Default byte cap for query and thought previews.
pub const DEFAULT_PREVIEW_BYTES: usize = 160;

/// Listing entry for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session ID.
    pub id: SessionId,
    /// Reasoning level.
    pub level: ReasoningLevel,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Thoughts recorded.
    pub thought_count: u32,
    /// Planned thought count.
    pub total_thoughts: u32,
    /// Estimated tokens across all thoughts.
    pub tokens_used: u64,
    /// When the session expires if left idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Query, cut to the preview limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_preview: Option<String>,
    /// Latest thought, cut to the preview limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_thought_preview: Option<String>,
}

impl SessionSummary {
    /// Summarize `session`, cutting previews to `max_preview_bytes`.
    pub fn new(
        session: &Session,
        expires_at: Option<DateTime<Utc>>,
        max_preview_bytes: usize,
    ) -> Self {
        Self {
            id: session.id.clone(),
            level: session.level,
            status: session.status,
            thought_count: session.thought_count(),
            total_thoughts: session.total_thoughts,
            tokens_used: session.tokens_used,
            expires_at,
            query_preview: session
                .query
                .as_deref()
                .map(|q| truncate(q, max_preview_bytes)),
            last_thought_preview: session
                .last_thought()
                .map(|t| truncate(&t.content, max_preview_bytes)),
        }
    }

    /// `"<thoughts>/<total>"`.
    pub fn progress(&self) -> String {
        format!("{}/{}", self.thought_count, self.total_thoughts)
    }
}
