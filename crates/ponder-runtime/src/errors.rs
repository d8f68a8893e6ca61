//! Reasoning error types.

use ponder_core::SessionId;
use ponder_sessions::CacheError;
use serde::{Deserialize, Serialize};

/// Errors surfaced by the reasoning orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasoningError {
    /// No live session has this ID.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session has no thought at this index.
    #[error("Thought {index} not found in session {session_id}")]
    ThoughtNotFound {
        /// Session that was addressed.
        session_id: SessionId,
        /// Requested index.
        index: u32,
    },

    /// Planned thought count outside the level's range.
    #[error("Invalid thought count {requested}: must be between {min} and {max}")]
    InvalidThoughtCount {
        /// Requested count.
        requested: i64,
        /// Smallest allowed value.
        min: u32,
        /// Largest allowed value.
        max: u32,
    },

    /// Run-to-completion was given fewer thoughts than the plan needs.
    #[error("Insufficient thoughts: {remaining} remaining, {provided} provided")]
    InsufficientThoughts {
        /// Thoughts supplied by the caller.
        provided: usize,
        /// Thoughts still missing from the plan.
        remaining: u32,
    },

    /// Request fields that cannot be used together.
    #[error("Invalid run mode arguments: {0}")]
    InvalidRunModeArgs(String),

    /// The run was cancelled before it finished.
    #[error("Reasoning aborted for session {0}")]
    ReasoningAborted(SessionId),

    /// Every task slot is taken.
    #[error("Server busy: {active}/{max} reasoning tasks running")]
    ServerBusy {
        /// Tasks running.
        active: usize,
        /// Task limit.
        max: usize,
    },
}

impl ReasoningError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::ThoughtNotFound { .. } => "thought_not_found",
            Self::InvalidThoughtCount { .. } => "invalid_thought_count",
            Self::InsufficientThoughts { .. } => "insufficient_thoughts",
            Self::InvalidRunModeArgs(_) => "invalid_run_mode_args",
            Self::ReasoningAborted(_) => "reasoning_aborted",
            Self::ServerBusy { .. } => "server_busy",
        }
    }

    /// Coarse grouping used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) | Self::ThoughtNotFound { .. } => "not_found",
            Self::InvalidThoughtCount { .. }
            | Self::InsufficientThoughts { .. }
            | Self::InvalidRunModeArgs(_) => "invalid_request",
            Self::ReasoningAborted(_) => "cancelled",
            Self::ServerBusy { .. } => "capacity",
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerBusy { .. })
    }

    /// Serializable form for protocol adapters.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<CacheError> for ReasoningError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::SessionNotFound(id) => Self::SessionNotFound(id),
            CacheError::ThoughtNotFound { session_id, index } => {
                Self::ThoughtNotFound { session_id, index }
            }
            CacheError::InvalidThoughtCount {
                requested,
                min,
                max,
            } => Self::InvalidThoughtCount {
                requested,
                min,
                max,
            },
        }
    }
}

/// Wire form of a [`ReasoningError`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&ReasoningError> for ErrorPayload {
    fn from(err: &ReasoningError) -> Self {
        err.to_payload()
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, ReasoningError>;
