//! Session cache error types.

use ponder_core::SessionId;
use thiserror::Error;

/// Errors returned by [`SessionCache`](crate::SessionCache) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No live session has this ID (never created, deleted, expired or evicted).
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session exists but has no thought at this index.
    #[error("Thought {index} not found in session {session_id}")]
    ThoughtNotFound {
        /// Session that was addressed.
        session_id: SessionId,
        /// Requested index.
        index: u32,
    },

    /// A planned thought count outside the allowed range.
    #[error("Invalid thought count {requested}: must be between {min} and {max}")]
    InvalidThoughtCount {
        /// Requested count.
        requested: i64,
        /// Smallest allowed value.
        min: u32,
        /// Largest allowed value.
        max: u32,
    },
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            CacheError::SessionNotFound(SessionId::from("s1")).to_string(),
            "Session not found: s1"
        );
        assert_eq!(
            CacheError::ThoughtNotFound {
                session_id: SessionId::from("s1"),
                index: 4
            }
            .to_string(),
            "Thought 4 not found in session s1"
        );
        assert_eq!(
            CacheError::InvalidThoughtCount {
                requested: 9,
                min: 3,
                max: 5
            }
            .to_string(),
            "Invalid thought count 9: must be between 3 and 5"
        );
    }
}
