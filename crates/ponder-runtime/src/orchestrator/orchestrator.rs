//! Reasoning orchestrator.
//!
//! Turns one request into a sequence of cache mutations on one session,
//! serialized against every other request for that session by
//! [`SessionLock`]. Cancellation and every argument check run before the
//! first mutation;
//! once a step commits it stays committed, even if a later step fails or
//! the run is cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use ponder_core::SessionId;
use ponder_sessions::{
    BaseEvent, Session, SessionCache, SessionEvent, SessionSummary, estimate_tokens,
    resolve_thought_count, validate_target,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::types::{OrchestratorConfig, Progress, ReasonOptions, ReasonOutcome, ReasonRequest};
use crate::errors::{ReasoningError, Result};
use crate::limiter::TaskLimiter;
use crate::lock::SessionLock;

/// Coordinates reasoning sessions.
pub struct ReasoningOrchestrator {
    cache: Arc<SessionCache>,
    locks: SessionLock,
    limiter: Arc<TaskLimiter>,
    running: DashMap<SessionId, CancellationToken>,
    shutdown: CancellationToken,
}

impl ReasoningOrchestrator {
    /// Orchestrator over a fresh cache built from `config`.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_cache(
            Arc::new(SessionCache::new(config.cache)),
            config.max_concurrent_tasks,
        )
    }

    /// Orchestrator over an existing cache.
    pub fn with_cache(cache: Arc<SessionCache>, max_concurrent_tasks: usize) -> Self {
        Self {
            cache,
            locks: SessionLock::new(),
            limiter: Arc::new(TaskLimiter::new(max_concurrent_tasks)),
            running: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Session cache.
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Per-session lock table.
    pub fn locks(&self) -> &SessionLock {
        &self.locks
    }

    /// Task limiter used by [`run_task`](Self::run_task).
    pub fn limiter(&self) -> &Arc<TaskLimiter> {
        &self.limiter
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.cache.subscribe()
    }

    /// Snapshot of a session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.cache.get(id)
    }

    /// Summaries of every live session, most recently touched first.
    pub fn summaries(&self, max_preview_bytes: usize) -> Vec<SessionSummary> {
        self.cache.summaries(max_preview_bytes)
    }

    /// Start the cache's TTL sweeper.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.cache.start_sweeper()
    }

    /// Number of runs currently holding a session.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Run `request` while holding a task slot.
    ///
    /// Fails with [`ReasoningError::ServerBusy`] when every slot is taken.
    pub async fn run_task(
        &self,
        request: ReasonRequest,
        options: ReasonOptions,
    ) -> Result<ReasonOutcome> {
        let Some(_permit) = self.limiter.try_acquire_permit() else {
            warn!(
                active = self.limiter.active(),
                max = self.limiter.max(),
                "rejecting task: all slots busy"
            );
            return Err(ReasoningError::ServerBusy {
                active: self.limiter.active(),
                max: self.limiter.max(),
            });
        };
        self.reason(request, options).await
    }

    /// Apply `request` to a new or existing session.
    #[instrument(
        skip_all,
        fields(session_id = ?request.session_id, level = %request.level)
    )]
    pub async fn reason(
        &self,
        request: ReasonRequest,
        options: ReasonOptions,
    ) -> Result<ReasonOutcome> {
        let inputs = request.content_inputs()?;
        if request.run_to_completion
            && request.session_id.is_none()
            && request.target_thoughts.is_none()
        {
            return Err(ReasoningError::InvalidRunModeArgs(
                "runToCompletion on a new session requires targetThoughts".into(),
            ));
        }

        let token = self.shutdown.child_token();
        let external = options.cancel.clone().unwrap_or_default();

        let (id, created, _guard, _registration) = match &request.session_id {
            Some(id) => {
                let guard = self.locks.acquire(id).await;
                let registration = Registration::new(&self.running, id, token.clone());
                self.abort_if_cancelled(id, &token, &external, 0)?;

                let session = self
                    .cache
                    .get(id)
                    .ok_or_else(|| ReasoningError::SessionNotFound(id.clone()))?;
                let total = match request.target_thoughts {
                    Some(target) => {
                        let n = validate_target(target, session.level.bounds())?;
                        if n < session.thought_count() {
                            return Err(ReasoningError::InvalidThoughtCount {
                                requested: target,
                                min: session.thought_count().max(session.level.bounds().min),
                                max: session.level.bounds().max,
                            });
                        }
                        Some(n)
                    }
                    None => None,
                };
                check_inputs(
                    &request,
                    &Plan {
                        terminal: session.status.is_terminal(),
                        recorded: session.thought_count(),
                        total: total.unwrap_or(session.total_thoughts),
                    },
                    &inputs,
                )?;

                if let Some(n) = total {
                    self.cache.set_total_thoughts(id, n)?;
                }
                (id.clone(), false, guard, registration)
            }
            None => {
                let level = request.level;
                let total = resolve_thought_count(
                    level,
                    &request.query,
                    level.bounds(),
                    request.target_thoughts,
                )?;
                check_inputs(
                    &request,
                    &Plan {
                        terminal: false,
                        recorded: 0,
                        total,
                    },
                    &inputs,
                )?;

                let query = (!request.query.trim().is_empty()).then(|| request.query.clone());
                let session = self.cache.create(level, Some(total), query)?;
                let guard = self.locks.acquire(&session.id).await;
                let registration = Registration::new(&self.running, &session.id, token.clone());
                self.abort_if_cancelled(&session.id, &token, &external, 0)?;
                (session.id.clone(), true, guard, registration)
            }
        };

        let rolled_back = match request.rollback_to_step {
            Some(step) => self.cache.rollback(&id, step)?,
            None => 0,
        };

        let last = inputs.len().saturating_sub(1);
        let mut added = Vec::with_capacity(inputs.len());
        let mut budget_exhausted = false;

        for (i, content) in inputs.into_iter().enumerate() {
            self.abort_if_cancelled(&id, &token, &external, added.len())?;

            let current = self
                .cache
                .get(&id)
                .ok_or_else(|| ReasoningError::SessionNotFound(id.clone()))?;
            let requested = estimate_tokens(&content);
            let budget = current.level.token_budget();
            if current.tokens_used + requested > budget {
                warn!(
                    session_id = %id,
                    tokens_used = current.tokens_used,
                    requested,
                    budget,
                    "token budget exhausted"
                );
                let _ = self.cache.events().emit(SessionEvent::TokenBudgetExhausted {
                    base: BaseEvent::at(&id, self.cache.now()),
                    tokens_used: current.tokens_used,
                    requested,
                    budget,
                });
                let _ = self.cache.mark_completed(&id);
                budget_exhausted = true;
                break;
            }

            let step_summary = if i == last {
                request.step_summary.clone()
            } else {
                None
            };
            let thought = self.cache.add_thought(&id, content, step_summary)?;
            debug!(session_id = %id, index = thought.index, "step committed");

            if let Some(sink) = &options.progress {
                sink.report(Progress {
                    progress: thought.index + 1,
                    total: current.total_thoughts,
                    step_summary: thought.step_summary.clone(),
                })
                .await;
            }
            added.push(thought);
        }

        if !budget_exhausted {
            let session = self
                .cache
                .get(&id)
                .ok_or_else(|| ReasoningError::SessionNotFound(id.clone()))?;
            let plan_reached = session.thought_count() >= session.total_thoughts;
            if session.is_active()
                && (request.is_conclusion || request.run_to_completion || plan_reached)
            {
                let _ = self.cache.mark_completed(&id);
            }
        }

        let session = self
            .cache
            .get(&id)
            .ok_or_else(|| ReasoningError::SessionNotFound(id.clone()))?;
        Ok(ReasonOutcome {
            session,
            created,
            added,
            rolled_back,
            budget_exhausted,
        })
    }

    /// Fail with [`ReasoningError::ReasoningAborted`] and mark the session
    /// cancelled once either token has fired.
    fn abort_if_cancelled(
        &self,
        id: &SessionId,
        token: &CancellationToken,
        external: &CancellationToken,
        committed: usize,
    ) -> Result<()> {
        if !token.is_cancelled() && !external.is_cancelled() {
            return Ok(());
        }
        let _ = self.cache.mark_cancelled(id);
        info!(session_id = %id, committed, "reasoning aborted");
        Err(ReasoningError::ReasoningAborted(id.clone()))
    }

    /// Cancel the run holding `id`, if any, and mark the session cancelled.
    ///
    /// Returns whether anything changed.
    pub fn abort(&self, id: &SessionId) -> bool {
        let signalled = self.running.get(id).map(|t| t.cancel()).is_some();
        let marked = self.cache.mark_cancelled(id);
        if signalled || marked {
            info!(session_id = %id, signalled, "abort requested");
        }
        signalled || marked
    }

    /// Cancel every running task and stop the sweeper.
    pub fn shutdown(&self) {
        info!(running = self.running.len(), "orchestrator shutting down");
        self.shutdown.cancel();
        self.cache.dispose();
    }
}

/// Session shape a request is checked against: the plan it will have once
/// any target override applies.
struct Plan {
    terminal: bool,
    recorded: u32,
    total: u32,
}

/// Reject request shapes that cannot apply to `plan`, before anything is
/// mutated.
fn check_inputs(request: &ReasonRequest, plan: &Plan, inputs: &[String]) -> Result<()> {
    if !inputs.is_empty() && plan.terminal {
        return Err(ReasoningError::InvalidRunModeArgs(
            "session is finished and accepts no more thoughts".into(),
        ));
    }
    if !request.run_to_completion {
        return Ok(());
    }

    let kept = match request.rollback_to_step {
        Some(step) if step.saturating_add(1) < plan.recorded => step + 1,
        _ => plan.recorded,
    };
    let remaining = plan.total.saturating_sub(kept);
    let provided = inputs.len();
    if provided < remaining as usize {
        return Err(ReasoningError::InsufficientThoughts {
            provided,
            remaining,
        });
    }
    if provided > remaining as usize {
        return Err(ReasoningError::InvalidRunModeArgs(format!(
            "{provided} thoughts provided but only {remaining} remain"
        )));
    }
    Ok(())
}

/// Entry in the running map, removed when the run ends.
struct Registration<'a> {
    running: &'a DashMap<SessionId, CancellationToken>,
    id: SessionId,
}

impl<'a> Registration<'a> {
    fn new(
        running: &'a DashMap<SessionId, CancellationToken>,
        id: &SessionId,
        token: CancellationToken,
    ) -> Self {
        let _ = running.insert(id.clone(), token);
        Self {
            running,
            id: id.clone(),
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let _ = self.running.remove(&self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ponder_sessions::{CacheConfig, ReasoningLevel, SessionStatus};

    use super::*;
    use crate::orchestrator::types::ProgressSink;

    fn orchestrator() -> ReasoningOrchestrator {
        orchestrator_with(10)
    }

    fn orchestrator_with(max_sessions: usize) -> ReasoningOrchestrator {
        ReasoningOrchestrator::new(OrchestratorConfig {
            cache: CacheConfig {
                ttl: Duration::from_secs(60),
                max_sessions,
                max_total_tokens: 1_000_000,
            },
            max_concurrent_tasks: 2,
        })
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Progress>>);

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn report(&self, progress: Progress) {
            self.0.lock().push(progress);
        }
    }

    #[tokio::test]
    async fn new_session_sized_by_query() {
        let orch = orchestrator();
        let out = orch
            .reason(ReasonRequest::new("hi", ReasoningLevel::Basic), ReasonOptions::default())
            .await
            .unwrap();
        assert!(out.created);
        assert_eq!(out.session.total_thoughts, 3);
        assert_eq!(out.session.query.as_deref(), Some("hi"));
        assert!(out.added.is_empty());
        assert!(out.session.is_active());
    }

    #[tokio::test]
    async fn continue_adds_thoughts_and_completes_at_plan() {
        let orch = orchestrator();
        let opened = orch
            .reason(
                ReasonRequest::new("hi", ReasoningLevel::Basic).with_thought("one"),
                ReasonOptions::default(),
            )
            .await
            .unwrap();
        let id = opened.session_id().clone();

        for step in ["two", "three"] {
            let _ = orch
                .reason(
                    ReasonRequest::continue_session(id.clone()).with_thought(step),
                    ReasonOptions::default(),
                )
                .await
                .unwrap();
        }

        let session = orch.session(&id).unwrap();
        assert_eq!(session.thought_count(), 3);
        assert_eq!(session.status, SessionStatus::Completed);

        assert_matches!(
            orch.reason(
                ReasonRequest::continue_session(id).with_thought("four"),
                ReasonOptions::default(),
            )
            .await,
            Err(ReasoningError::InvalidRunModeArgs(_))
        );
    }

    #[tokio::test]
    async fn conclusion_completes_early() {
        let orch = orchestrator();
        let mut req = ReasonRequest::new("hi", ReasoningLevel::Normal).with_thought("done");
        req.is_conclusion = true;
        let out = orch.reason(req, ReasonOptions::default()).await.unwrap();
        assert_eq!(out.session.status, SessionStatus::Completed);
        assert_eq!(out.session.thought_count(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let orch = orchestrator();
        assert_matches!(
            orch.reason(
                ReasonRequest::continue_session(SessionId::from("ghost")).with_thought("x"),
                ReasonOptions::default(),
            )
            .await,
            Err(ReasoningError::SessionNotFound(_))
        );
    }

    #[tokio::test]
    async fn explicit_target_out_of_range() {
        let orch = orchestrator();
        assert_matches!(
            orch.reason(
                ReasonRequest::new("q", ReasoningLevel::Basic).with_target(9),
                ReasonOptions::default(),
            )
            .await,
            Err(ReasoningError::InvalidThoughtCount { requested: 9, .. })
        );
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn target_override_on_existing_session() {
        let orch = orchestrator();
        let id = orch
            .reason(ReasonRequest::new("q", ReasoningLevel::Basic), ReasonOptions::default())
            .await
            .unwrap()
            .session_id()
            .clone();
        let out = orch
            .reason(
                ReasonRequest::continue_session(id).with_target(5),
                ReasonOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.session.total_thoughts, 5);
    }

    #[tokio::test]
    async fn run_to_completion_fills_the_plan() {
        let orch = orchestrator();
        let recorder = Arc::new(Recorder::default());
        let mut req = ReasonRequest::new("q", ReasoningLevel::Basic)
            .with_target(4)
            .with_thoughts(["a", "b", "c", "d"]);
        req.run_to_completion = true;
        req.step_summary = Some("wrap".into());

        let out = orch
            .reason(
                req,
                ReasonOptions {
                    progress: Some(recorder.clone()),
                    ..ReasonOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(out.added.len(), 4);
        assert_eq!(out.session.status, SessionStatus::Completed);
        let progress = recorder.0.lock();
        assert_eq!(
            progress.iter().map(|p| p.progress).collect::<Vec<_>>(),
            [1, 2, 3, 4]
        );
        assert!(progress.iter().all(|p| p.total == 4));
        assert_eq!(progress[3].step_summary.as_deref(), Some("wrap"));
        assert!(progress[0].step_summary.is_none());
    }

    #[tokio::test]
    async fn run_to_completion_argument_rules() {
        let orch = orchestrator();

        let mut no_target = ReasonRequest::new("q", ReasoningLevel::Basic).with_thoughts(["a"]);
        no_target.run_to_completion = true;
        assert_matches!(
            orch.reason(no_target, ReasonOptions::default()).await,
            Err(ReasoningError::InvalidRunModeArgs(_))
        );

        let mut too_few = ReasonRequest::new("q", ReasoningLevel::Basic)
            .with_target(4)
            .with_thoughts(["a", "b"]);
        too_few.run_to_completion = true;
        assert_matches!(
            orch.reason(too_few, ReasonOptions::default()).await,
            Err(ReasoningError::InsufficientThoughts { provided: 2, remaining: 4 })
        );

        let mut too_many = ReasonRequest::new("q", ReasoningLevel::Basic)
            .with_target(3)
            .with_thoughts(["a", "b", "c", "d"]);
        too_many.run_to_completion = true;
        assert_matches!(
            orch.reason(too_many, ReasonOptions::default()).await,
            Err(ReasoningError::InvalidRunModeArgs(_))
        );
    }

    #[tokio::test]
    async fn rejected_new_session_leaves_cache_untouched() {
        let orch = orchestrator_with(1);
        let kept = orch
            .reason(ReasonRequest::new("q", ReasoningLevel::Basic), ReasonOptions::default())
            .await
            .unwrap()
            .session_id()
            .clone();
        let mut rx = orch.subscribe();

        let mut too_few = ReasonRequest::new("q", ReasoningLevel::Basic)
            .with_target(4)
            .with_thoughts(["a", "b"]);
        too_few.run_to_completion = true;
        assert_matches!(
            orch.reason(too_few, ReasonOptions::default()).await,
            Err(ReasoningError::InsufficientThoughts { provided: 2, remaining: 4 })
        );

        assert_eq!(orch.cache().list_session_ids(), [kept]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_request_keeps_existing_plan() {
        let orch = orchestrator();
        let id = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Basic).with_target(3),
                ReasonOptions::default(),
            )
            .await
            .unwrap()
            .session_id()
            .clone();

        let mut req = ReasonRequest::continue_session(id.clone())
            .with_target(5)
            .with_thoughts(["a"]);
        req.run_to_completion = true;
        assert_matches!(
            orch.reason(req, ReasonOptions::default()).await,
            Err(ReasoningError::InsufficientThoughts { provided: 1, remaining: 5 })
        );
        assert_eq!(orch.session(&id).unwrap().total_thoughts, 3);
    }

    #[tokio::test]
    async fn target_below_recorded_thoughts_is_rejected() {
        let orch = orchestrator();
        let steps: Vec<String> = (0..12).map(|i| format!("step {i}")).collect();
        let id = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Deep)
                    .with_target(20)
                    .with_thoughts(steps),
                ReasonOptions::default(),
            )
            .await
            .unwrap()
            .session_id()
            .clone();

        assert_matches!(
            orch.reason(
                ReasonRequest::continue_session(id.clone()).with_target(11),
                ReasonOptions::default(),
            )
            .await,
            Err(ReasoningError::InvalidThoughtCount { requested: 11, min: 12, max: 20 })
        );
        assert_eq!(orch.session(&id).unwrap().total_thoughts, 20);
    }

    #[tokio::test]
    async fn cancelled_call_does_not_roll_back() {
        let orch = orchestrator();
        let id = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Normal).with_thoughts(["a", "b", "c"]),
                ReasonOptions::default(),
            )
            .await
            .unwrap()
            .session_id()
            .clone();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut req = ReasonRequest::continue_session(id.clone()).with_target(8);
        req.rollback_to_step = Some(0);
        assert_matches!(
            orch.reason(
                req,
                ReasonOptions {
                    cancel: Some(cancel),
                    ..ReasonOptions::default()
                },
            )
            .await,
            Err(ReasoningError::ReasoningAborted(aborted)) if aborted == id
        );

        let session = orch.session(&id).unwrap();
        assert_eq!(session.thought_count(), 3);
        assert_ne!(session.total_thoughts, 8);
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(orch.running_count(), 0);
    }

    #[tokio::test]
    async fn rollback_before_adding() {
        let orch = orchestrator();
        let id = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Normal).with_thoughts(["a", "b", "c"]),
                ReasonOptions::default(),
            )
            .await
            .unwrap()
            .session_id()
            .clone();

        let mut req = ReasonRequest::continue_session(id).with_thought("b2");
        req.rollback_to_step = Some(0);
        let out = orch.reason(req, ReasonOptions::default()).await.unwrap();
        assert_eq!(out.rolled_back, 2);
        let contents: Vec<_> = out.session.thoughts.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["a", "b2"]);
    }

    #[tokio::test]
    async fn budget_is_checked_before_commit() {
        let orch = orchestrator();
        let mut rx = orch.subscribe();
        // Basic allows 8000 tokens; 7000 + 2000 overflows.
        let big = "x".repeat(7_000 * 4);
        let bigger = "y".repeat(2_000 * 4);
        let out = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Basic).with_thoughts([big, bigger]),
                ReasonOptions::default(),
            )
            .await
            .unwrap();

        assert!(out.budget_exhausted);
        assert_eq!(out.added.len(), 1);
        assert_eq!(out.session.tokens_used, 7_000);
        assert_eq!(out.session.status, SessionStatus::Completed);

        let mut saw_exhausted = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::TokenBudgetExhausted {
                tokens_used,
                requested,
                budget,
                ..
            } = event
            {
                assert_eq!((tokens_used, requested, budget), (7_000, 2_000, 8_000));
                saw_exhausted = true;
            }
        }
        assert!(saw_exhausted);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_and_marks_cancelled() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orch
            .reason(
                ReasonRequest::new("q", ReasoningLevel::Basic).with_thought("a"),
                ReasonOptions {
                    cancel: Some(cancel),
                    ..ReasonOptions::default()
                },
            )
            .await;
        let id = assert_matches!(result, Err(ReasoningError::ReasoningAborted(id)) => id);
        assert_eq!(orch.session(&id).unwrap().status, SessionStatus::Cancelled);
        assert_eq!(orch.running_count(), 0);
    }

    #[tokio::test]
    async fn run_task_rejects_when_busy() {
        let orch = orchestrator();
        let a = orch.limiter().try_acquire_permit().unwrap();
        let _b = orch.limiter().try_acquire_permit().unwrap();
        assert_matches!(
            orch.run_task(ReasonRequest::new("q", ReasoningLevel::Basic), ReasonOptions::default())
                .await,
            Err(ReasoningError::ServerBusy { active: 2, max: 2 })
        );
        drop(a);
        assert!(
            orch.run_task(ReasonRequest::new("q", ReasoningLevel::Basic), ReasonOptions::default())
                .await
                .is_ok()
        );
        assert_eq!(orch.limiter().active(), 1);
    }

    #[tokio::test]
    async fn abort_idle_session_marks_cancelled() {
        let orch = orchestrator();
        let id = orch
            .reason(ReasonRequest::new("q", ReasoningLevel::Basic), ReasonOptions::default())
            .await
            .unwrap()
            .session_id()
            .clone();
        assert!(orch.abort(&id));
        assert!(!orch.abort(&id));
        assert_eq!(orch.session(&id).unwrap().status, SessionStatus::Cancelled);
    }
}
