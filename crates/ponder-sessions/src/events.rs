//! Session lifecycle events and the broadcast emitter that delivers them.
//!
//! The cache and the orchestrator publish [`SessionEvent`]s; protocol
//! adapters subscribe and translate them into notifications. Publishers
//! never learn who is listening.

use chrono::{DateTime, Utc};
use ponder_core::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::levels::ReasoningLevel;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Common fields for all session events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Base fields stamped with `at`.
    pub fn at(session_id: &SessionId, at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.clone(),
            timestamp: at.to_rfc3339(),
        }
    }

    /// Base fields stamped with the current system time.
    pub fn now(session_id: &SessionId) -> Self {
        Self::at(session_id, Utc::now())
    }
}

/// Why a session was evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The live-session cap was reached by a new session.
    MaxSessions,
    /// The aggregate token cap would be exceeded by a write to another session.
    MaxTotalTokens,
}

impl EvictionReason {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxSessions => "max_sessions",
            Self::MaxTotalTokens => "max_total_tokens",
        }
    }
}

/// Generates [`SessionEvent`] plus its `base()` and `event_type()` accessors.
macro_rules! session_events {
    ($(
        $(#[doc = $doc:literal])*
        $variant:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),*
            $(,)?
        } => $rename:literal
    ),* $(,)?) => {
        /// Lifecycle event for one session.
        #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        #[allow(missing_docs)]
        pub enum SessionEvent {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $rename)]
                $variant {
                    #[serde(flatten)]
                    base: BaseEvent,
                    $(
                        $(#[$fmeta])*
                        $field: $ty,
                    )*
                },
            )*
        }

        impl SessionEvent {
            /// Get the base event fields.
            pub fn base(&self) -> &BaseEvent {
                match self {
                    $(Self::$variant { base, .. } => base,)*
                }
            }

            /// Get the event type string.
            pub fn event_type(&self) -> &'static str {
                match self {
                    $(Self::$variant { .. } => $rename,)*
                }
            }
        }
    };
}

session_events! {
    /// A session was opened.
    SessionCreated {
        level: ReasoningLevel,
        #[serde(rename = "totalThoughts")]
        total_thoughts: u32,
    } => "session_created",

    /// A session reached its conclusion.
    SessionCompleted {} => "session_completed",

    /// A session was abandoned.
    SessionCancelled {} => "session_cancelled",

    /// A session sat idle past its TTL and was swept.
    SessionExpired {} => "session_expired",

    /// A session was removed to relieve capacity or token pressure.
    SessionEvicted {
        reason: EvictionReason,
    } => "session_evicted",

    /// A session was removed on request.
    SessionDeleted {} => "session_deleted",

    /// A thought was appended.
    ThoughtAdded {
        index: u32,
        #[serde(rename = "tokenCount")]
        token_count: u64,
    } => "thought_added",

    /// A thought was edited in place.
    ThoughtRevised {
        index: u32,
        revision: u32,
    } => "thought_revised",

    /// A thought was refused because the level's token budget would overflow.
    TokenBudgetExhausted {
        #[serde(rename = "tokensUsed")]
        tokens_used: u64,
        requested: u64,
        budget: u64,
    } => "token_budget_exhausted",

    /// The session's resource representation changed.
    ResourceUpdated {} => "resource_updated",

    /// The set of sessions changed (one was added or removed).
    ResourcesChanged {} => "resources_changed",
}

impl SessionEvent {
    /// Session the event refers to.
    pub fn session_id(&self) -> &SessionId {
        &self.base().session_id
    }
}

/// Fan-out of [`SessionEvent`]s to every subscriber.
///
/// `emit` never awaits. A receiver that falls more than the channel
/// capacity behind sees `Lagged` and skips ahead.
#[derive(Debug)]
pub struct EventEmitter {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    /// Emitter buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish one event. Returns the number of receivers reached.
    pub fn emit(&self, event: SessionEvent) -> usize {
        trace!(
            session_id = %event.session_id(),
            event = event.event_type(),
            "session event"
        );
        self.tx.send(event).unwrap_or(0)
    }

    /// Publish events in order, as produced by one cache operation.
    pub fn emit_all(&self, events: impl IntoIterator<Item = SessionEvent>) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        for event in events {
            let _ = self.emit(event);
        }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
