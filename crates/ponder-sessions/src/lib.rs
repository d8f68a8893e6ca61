//! # ponder-sessions
//!
//! Bounded store for reasoning sessions.
//!
//! - **Cache**: [`SessionCache`] with recency eviction, TTL sweeping and an
//!   aggregate token cap
//! - **Model**: [`Session`], [`Thought`], [`ReasoningLevel`]
//! - **Events**: [`SessionEvent`] published through an [`EventEmitter`]
//! - **Heuristic**: [`resolve_thought_count`] sizes a new session's plan
//! - **Previews**: [`SessionSummary`] with byte-bounded text
//!
//! ## Crate Position
//!
//! Depends on ponder-core and ponder-settings. Depended on by ponder-runtime.

#![deny(unsafe_code)]

pub mod cache;
pub mod complexity;
pub mod errors;
pub mod events;
pub mod levels;
pub mod model;
pub mod preview;
pub mod recency;

pub use cache::{CacheConfig, SessionCache};
pub use complexity::{complexity_score, resolve_thought_count, validate_target};
pub use errors::{CacheError, Result};
pub use events::{BaseEvent, EventEmitter, EvictionReason, SessionEvent};
pub use levels::{ReasoningLevel, ThoughtBounds, UnknownLevel};
pub use model::{Session, SessionStatus, Thought, estimate_tokens};
pub use preview::{DEFAULT_PREVIEW_BYTES, SessionSummary};
