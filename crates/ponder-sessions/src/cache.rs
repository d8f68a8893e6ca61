//! In-memory session cache.
//!
//! Holds every live [`Session`] behind a single mutex together with a
//! recency list and the aggregate token count. Each public method does its
//! whole update inside one critical section, so calls are atomic with
//! respect to each other; events produced by an update are collected under
//! the lock and published after it is released.
//!
//! Three mechanisms bound memory:
//!
//! - **Capacity**: creating a session while `max_sessions` are live evicts
//!   the least recently touched one.
//! - **Tokens**: a write that would push the aggregate over
//!   `max_total_tokens` first evicts the least recently touched *other*
//!   sessions. The writer itself is never evicted by its own write.
//! - **TTL**: [`SessionCache::sweep`] (run periodically by
//!   [`SessionCache::start_sweeper`]) drops sessions idle for longer than
//!   the TTL.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use ponder_core::{Clock, SessionId, SystemClock};
use ponder_settings::PonderSettings;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::complexity::validate_target;
use crate::errors::{CacheError, Result};
use crate::events::{BaseEvent, EventEmitter, EvictionReason, SessionEvent};
use crate::levels::ReasoningLevel;
use crate::model::{Session, SessionStatus, Thought, estimate_tokens};
use crate::preview::SessionSummary;
use crate::recency::{NodeRef, RecencyList};

/// Shortest sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Longest sweep period.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Limits enforced by a [`SessionCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Idle time after which a session expires.
    pub ttl: Duration,
    /// Live sessions allowed at once.
    pub max_sessions: usize,
    /// Aggregate token cap across all sessions.
    pub max_total_tokens: u64,
}

impl CacheConfig {
    /// Period of the background sweeper: half the TTL, within 1s..=60s.
    pub fn sweep_interval(&self) -> Duration {
        (self.ttl / 2).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }
}

impl From<&PonderSettings> for CacheConfig {
    fn from(settings: &PonderSettings) -> Self {
        Self {
            ttl: Duration::from_millis(settings.session.ttl_ms),
            max_sessions: settings.session.max_sessions,
            max_total_tokens: settings.session.max_total_tokens,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&PonderSettings::default())
    }
}

struct Entry {
    session: Session,
    node: NodeRef,
    /// Memoized snapshot, cleared on every mutation.
    snapshot: Option<Arc<Session>>,
}

impl Entry {
    fn snapshot(&mut self) -> Arc<Session> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }
        let snapshot = Arc::new(self.session.clone());
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.session.updated_at = self.session.updated_at.max(now);
        self.snapshot = None;
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<SessionId, Entry>,
    recency: RecencyList<SessionId>,
    total_tokens: u64,
}

impl State {
    fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let entry = self.entries.remove(id)?;
        let _ = self.recency.remove(entry.node);
        self.total_tokens = self.total_tokens.saturating_sub(entry.session.tokens_used);
        Some(entry.session)
    }

    /// Least recently touched live session other than `except`.
    /// Unlinks orphaned nodes met on the way.
    fn oldest_candidate(&mut self, except: Option<&SessionId>) -> Option<SessionId> {
        let mut cursor = self.recency.oldest().map(|(n, k)| (n, k.clone()));
        while let Some((node, id)) = cursor {
            cursor = self.recency.newer(node).map(|(n, k)| (n, k.clone()));
            if !self.entries.contains_key(&id) {
                let _ = self.recency.remove(node);
            } else if except != Some(&id) {
                return Some(id);
            }
        }
        None
    }
}

/// Bounded store of reasoning sessions.
pub struct SessionCache {
    config: CacheConfig,
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    emitter: Arc<EventEmitter>,
    sweeper: CancellationToken,
}

impl SessionCache {
    /// Cache on the system clock with its own event emitter.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            clock,
            emitter: Arc::new(EventEmitter::default()),
            sweeper: CancellationToken::new(),
        }
    }

    /// Limits this cache enforces.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Emitter that publishes this cache's lifecycle events.
    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.emitter.subscribe()
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open a new session.
    ///
    /// Without `total_thoughts` the level minimum is planned. At capacity
    /// the least recently touched session is evicted first.
    pub fn create(
        &self,
        level: ReasoningLevel,
        total_thoughts: Option<u32>,
        query: Option<String>,
    ) -> Result<Arc<Session>> {
        let bounds = level.bounds();
        let total_thoughts = match total_thoughts {
            Some(n) => validate_target(i64::from(n), bounds)?,
            None => bounds.min,
        };
        let now = self.clock.now();
        let mut events = Vec::new();

        let snapshot = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            while state.entries.len() >= self.config.max_sessions.max(1) {
                let Some(victim) = state.oldest_candidate(None) else {
                    break;
                };
                if let Some(evicted) = state.remove(&victim) {
                    info!(
                        session_id = %victim,
                        reason = EvictionReason::MaxSessions.as_str(),
                        tokens = evicted.tokens_used,
                        "session evicted"
                    );
                    push_removed(&mut events, SessionEvent::SessionEvicted {
                        base: BaseEvent::at(&victim, now),
                        reason: EvictionReason::MaxSessions,
                    });
                }
            }

            let id = SessionId::new();
            let session = Session {
                id: id.clone(),
                level,
                status: SessionStatus::Active,
                thoughts: Vec::new(),
                total_thoughts,
                tokens_used: 0,
                created_at: now,
                updated_at: now,
                query,
            };
            let node = state.recency.push_newest(id.clone());
            let mut entry = Entry {
                session,
                node,
                snapshot: None,
            };
            let snapshot = entry.snapshot();
            let _ = state.entries.insert(id.clone(), entry);

            events.push(SessionEvent::SessionCreated {
                base: BaseEvent::at(&id, now),
                level,
                total_thoughts,
            });
            events.push(SessionEvent::ResourcesChanged {
                base: BaseEvent::at(&id, now),
            });
            snapshot
        };

        info!(session_id = %snapshot.id, %level, total_thoughts, "session created");
        self.publish(events);
        Ok(snapshot)
    }

    /// Immutable snapshot of a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.state.lock().entries.get_mut(id).map(Entry::snapshot)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Append a thought.
    pub fn add_thought(
        &self,
        id: &SessionId,
        content: impl Into<String>,
        step_summary: Option<String>,
    ) -> Result<Thought> {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        let now = self.clock.now();
        let mut events = Vec::new();

        let thought = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.entries.contains_key(id) {
                return Err(CacheError::SessionNotFound(id.clone()));
            }
            self.make_headroom(state, id, tokens, now, &mut events);
            let entry = state
                .entries
                .get_mut(id)
                .ok_or_else(|| CacheError::SessionNotFound(id.clone()))?;

            let thought = Thought {
                index: entry.session.thought_count(),
                content,
                revision: 0,
                step_summary,
                token_count: tokens,
                created_at: now,
                updated_at: now,
            };
            entry.session.thoughts.push(thought.clone());
            entry.session.tokens_used += tokens;
            entry.touch(now);
            state.total_tokens += tokens;
            state.recency.touch(entry.node);

            events.push(SessionEvent::ThoughtAdded {
                base: BaseEvent::at(id, now),
                index: thought.index,
                token_count: tokens,
            });
            events.push(SessionEvent::ResourceUpdated {
                base: BaseEvent::at(id, now),
            });
            thought
        };

        debug!(session_id = %id, index = thought.index, tokens, "thought added");
        self.publish(events);
        Ok(thought)
    }

    /// Replace the content of an existing thought.
    ///
    /// `step_summary` replaces the old summary when given.
    pub fn revise_thought(
        &self,
        id: &SessionId,
        index: u32,
        content: impl Into<String>,
        step_summary: Option<String>,
    ) -> Result<Thought> {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        let now = self.clock.now();
        let mut events = Vec::new();
        let not_found = || CacheError::ThoughtNotFound {
            session_id: id.clone(),
            index,
        };

        let revised = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let old_tokens = state
                .entries
                .get(id)
                .ok_or_else(|| CacheError::SessionNotFound(id.clone()))?
                .session
                .thoughts
                .get(index as usize)
                .ok_or_else(not_found)?
                .token_count;
            if tokens > old_tokens {
                self.make_headroom(state, id, tokens - old_tokens, now, &mut events);
            }

            let entry = state
                .entries
                .get_mut(id)
                .ok_or_else(|| CacheError::SessionNotFound(id.clone()))?;
            let thought = entry
                .session
                .thoughts
                .get_mut(index as usize)
                .ok_or_else(not_found)?;
            thought.content = content;
            thought.revision += 1;
            if step_summary.is_some() {
                thought.step_summary = step_summary;
            }
            thought.token_count = tokens;
            thought.updated_at = thought.updated_at.max(now);
            let revised = thought.clone();

            entry.session.tokens_used = entry.session.tokens_used - old_tokens + tokens;
            entry.touch(now);
            state.total_tokens = state.total_tokens.saturating_sub(old_tokens) + tokens;
            state.recency.touch(entry.node);

            events.push(SessionEvent::ThoughtRevised {
                base: BaseEvent::at(id, now),
                index,
                revision: revised.revision,
            });
            events.push(SessionEvent::ResourceUpdated {
                base: BaseEvent::at(id, now),
            });
            revised
        };

        debug!(session_id = %id, index, revision = revised.revision, "thought revised");
        self.publish(events);
        Ok(revised)
    }

    /// Drop every thought after `to_index`.
    ///
    /// Returns how many thoughts were discarded. Does nothing (and returns
    /// 0) unless `to_index` leaves at least one thought to discard.
    pub fn rollback(&self, id: &SessionId, to_index: u32) -> Result<usize> {
        let now = self.clock.now();
        let discarded = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .entries
                .get_mut(id)
                .ok_or_else(|| CacheError::SessionNotFound(id.clone()))?;
            let keep = to_index as usize + 1;
            if keep >= entry.session.thoughts.len() {
                return Ok(0);
            }
            let dropped: Vec<Thought> = entry.session.thoughts.drain(keep..).collect();
            let freed: u64 = dropped.iter().map(|t| t.token_count).sum();
            entry.session.tokens_used -= freed;
            entry.touch(now);
            state.total_tokens = state.total_tokens.saturating_sub(freed);
            state.recency.touch(entry.node);
            dropped.len()
        };

        debug!(session_id = %id, to_index, discarded, "rolled back");
        self.publish(vec![SessionEvent::ResourceUpdated {
            base: BaseEvent::at(id, now),
        }]);
        Ok(discarded)
    }

    /// Move an active session to `completed`.
    pub fn mark_completed(&self, id: &SessionId) -> bool {
        self.transition(id, SessionStatus::Completed)
    }

    /// Move an active session to `cancelled`.
    pub fn mark_cancelled(&self, id: &SessionId) -> bool {
        self.transition(id, SessionStatus::Cancelled)
    }

    fn transition(&self, id: &SessionId, to: SessionStatus) -> bool {
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(id) else {
                return false;
            };
            if entry.session.status.is_terminal() {
                return false;
            }
            entry.session.status = to;
            entry.touch(now);
            state.recency.touch(entry.node);
        }

        let base = BaseEvent::at(id, now);
        let event = match to {
            SessionStatus::Cancelled => SessionEvent::SessionCancelled { base: base.clone() },
            _ => SessionEvent::SessionCompleted { base: base.clone() },
        };
        info!(session_id = %id, status = ?to, "session finished");
        self.publish(vec![event, SessionEvent::ResourceUpdated { base }]);
        true
    }

    /// Change a session's planned thought count.
    ///
    /// `n` must lie inside the level bounds and cover the thoughts already
    /// recorded.
    pub fn set_total_thoughts(&self, id: &SessionId, n: u32) -> Result<()> {
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .entries
                .get_mut(id)
                .ok_or_else(|| CacheError::SessionNotFound(id.clone()))?;
            let bounds = entry.session.level.bounds();
            let _ = validate_target(i64::from(n), bounds)?;
            if n < entry.session.thought_count() {
                return Err(CacheError::InvalidThoughtCount {
                    requested: i64::from(n),
                    min: entry.session.thought_count().max(bounds.min),
                    max: bounds.max,
                });
            }
            entry.session.total_thoughts = n;
            entry.touch(now);
            state.recency.touch(entry.node);
        }

        self.publish(vec![SessionEvent::ResourceUpdated {
            base: BaseEvent::at(id, now),
        }]);
        Ok(())
    }

    /// Remove a session. Returns `false` if it was not live.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.state.lock().remove(id);
        if removed.is_none() {
            return false;
        }
        let now = self.clock.now();
        info!(session_id = %id, "session deleted");
        let mut events = Vec::with_capacity(2);
        push_removed(&mut events, SessionEvent::SessionDeleted {
            base: BaseEvent::at(id, now),
        });
        self.publish(events);
        true
    }

    /// Remove sessions idle past the TTL, oldest first.
    ///
    /// Stops at the first session that has not expired. Returns the number
    /// of sessions removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl();
        let mut events = Vec::new();

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            while let Some((node, id)) = state.recency.oldest().map(|(n, k)| (n, k.clone())) {
                let Some(entry) = state.entries.get(&id) else {
                    let _ = state.recency.remove(node);
                    continue;
                };
                if !is_expired(entry.session.updated_at, ttl, now) {
                    break;
                }
                let _ = state.remove(&id);
                push_removed(&mut events, SessionEvent::SessionExpired {
                    base: BaseEvent::at(&id, now),
                });
            }
        }

        let expired = events.len() / 2;
        if expired > 0 {
            info!(expired, "expired idle sessions");
        }
        self.publish(events);
        expired
    }

    /// Aggregate tokens held by all live sessions.
    pub fn total_tokens_used(&self) -> u64 {
        self.state.lock().total_tokens
    }

    /// Live session IDs, most recently touched first.
    pub fn list_session_ids(&self) -> Vec<SessionId> {
        let state = self.state.lock();
        state
            .recency
            .iter_newest_first()
            .filter(|id| state.entries.contains_key(*id))
            .cloned()
            .collect()
    }

    /// When `id` will expire if left untouched.
    pub fn expires_at(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        let ttl = self.ttl();
        self.state
            .lock()
            .entries
            .get(id)
            .and_then(|e| e.session.updated_at.checked_add_signed(ttl))
    }

    /// Summaries of all live sessions, most recently touched first.
    pub fn summaries(&self, max_preview_bytes: usize) -> Vec<SessionSummary> {
        let ttl = self.ttl();
        let state = self.state.lock();
        state
            .recency
            .iter_newest_first()
            .filter_map(|id| state.entries.get(id))
            .map(|e| {
                let expires_at = e.session.updated_at.checked_add_signed(ttl);
                SessionSummary::new(&e.session, expires_at, max_preview_bytes)
            })
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic TTL sweeper.
    ///
    /// The task holds only a weak reference and exits when the cache is
    /// dropped or [`dispose`](Self::dispose) is called.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let cancel = self.sweeper.clone();
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        let _ = cache.sweep();
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }

    /// Stop the background sweeper.
    pub fn dispose(&self) {
        self.sweeper.cancel();
    }

    fn ttl(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.ttl).unwrap_or(TimeDelta::MAX)
    }

    /// Evict the oldest sessions other than `writer` until `incoming` more
    /// tokens fit under the aggregate cap, or no candidate remains.
    fn make_headroom(
        &self,
        state: &mut State,
        writer: &SessionId,
        incoming: u64,
        now: DateTime<Utc>,
        events: &mut Vec<SessionEvent>,
    ) {
        while state.total_tokens + incoming > self.config.max_total_tokens {
            let Some(victim) = state.oldest_candidate(Some(writer)) else {
                break;
            };
            if let Some(evicted) = state.remove(&victim) {
                info!(
                    session_id = %victim,
                    reason = EvictionReason::MaxTotalTokens.as_str(),
                    tokens = evicted.tokens_used,
                    "session evicted"
                );
                push_removed(events, SessionEvent::SessionEvicted {
                    base: BaseEvent::at(&victim, now),
                    reason: EvictionReason::MaxTotalTokens,
                });
            }
        }
    }

    fn publish(&self, events: Vec<SessionEvent>) {
        self.emitter.emit_all(events);
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

fn is_expired(updated_at: DateTime<Utc>, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
    updated_at
        .checked_add_signed(ttl)
        .is_some_and(|deadline| deadline < now)
}

/// Queue a removal event followed by the matching `resources_changed`.
fn push_removed(events: &mut Vec<SessionEvent>, event: SessionEvent) {
    let base = event.base().clone();
    events.push(event);
    events.push(SessionEvent::ResourcesChanged { base });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
