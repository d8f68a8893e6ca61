//! Request, options and outcome types for the reasoning orchestrator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ponder_core::SessionId;
use ponder_sessions::{CacheConfig, ReasoningLevel, Session, Thought};
use ponder_settings::PonderSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ReasoningError, Result};

/// One call into the orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasonRequest {
    /// Question being reasoned about. Used to size new sessions.
    pub query: String,
    /// Level for a new session. Ignored for existing sessions.
    pub level: ReasoningLevel,
    /// Continue this session instead of opening a new one.
    pub session_id: Option<SessionId>,
    /// Explicit planned thought count.
    pub target_thoughts: Option<i64>,
    /// A single thought to add.
    pub thought: Option<String>,
    /// Several thoughts to add in order.
    pub thoughts: Option<Vec<String>>,
    /// What was noticed. Structured fields form one thought together.
    pub observation: Option<String>,
    /// Proposed explanation.
    pub hypothesis: Option<String>,
    /// Judgement of the hypothesis.
    pub evaluation: Option<String>,
    /// Summary attached to the last thought added by this call.
    pub step_summary: Option<String>,
    /// Finish the session after this call.
    pub is_conclusion: bool,
    /// Discard thoughts after this index before adding new ones.
    pub rollback_to_step: Option<u32>,
    /// Add every remaining thought of the plan in one call.
    pub run_to_completion: bool,
}

impl ReasonRequest {
    /// Request opening a new session for `query`.
    pub fn new(query: impl Into<String>, level: ReasoningLevel) -> Self {
        Self {
            query: query.into(),
            level,
            ..Self::default()
        }
    }

    /// Request continuing `session_id`.
    pub fn continue_session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    /// Set a single thought.
    #[must_use]
    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    /// Set a batch of thoughts.
    #[must_use]
    pub fn with_thoughts<I, S>(mut self, thoughts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.thoughts = Some(thoughts.into_iter().map(Into::into).collect());
        self
    }

    /// Set the planned thought count.
    #[must_use]
    pub fn with_target(mut self, target: i64) -> Self {
        self.target_thoughts = Some(target);
        self
    }

    /// Structured observation/hypothesis/evaluation, joined into one
    /// labelled thought.
    pub(crate) fn structured_thought(&self) -> Option<String> {
        let parts: Vec<String> = [
            ("Observation", &self.observation),
            ("Hypothesis", &self.hypothesis),
            ("Evaluation", &self.evaluation),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| format!("{label}: {v}")))
        .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    /// Content this request adds, in order, after checking which inputs
    /// may be combined.
    pub(crate) fn content_inputs(&self) -> Result<Vec<String>> {
        let structured = self.structured_thought();

        if self.run_to_completion {
            if self.thought.is_some() || structured.is_some() {
                return Err(ReasoningError::InvalidRunModeArgs(
                    "runToCompletion takes thoughts[], not thought or structured fields".into(),
                ));
            }
            return match &self.thoughts {
                Some(thoughts) if !thoughts.is_empty() => Ok(thoughts.clone()),
                _ => Err(ReasoningError::InvalidRunModeArgs(
                    "runToCompletion requires a non-empty thoughts[]".into(),
                )),
            };
        }

        match (&self.thought, &self.thoughts, structured) {
            (None, None, None) => Ok(Vec::new()),
            (Some(thought), None, None) => Ok(vec![thought.clone()]),
            (None, Some(thoughts), None) => Ok(thoughts.clone()),
            (None, None, Some(structured)) => Ok(vec![structured]),
            (Some(_), Some(_), _) => Err(ReasoningError::InvalidRunModeArgs(
                "thought and thoughts[] cannot be combined".into(),
            )),
            _ => Err(ReasoningError::InvalidRunModeArgs(
                "structured fields cannot be combined with thought or thoughts[]".into(),
            )),
        }
    }
}

/// Progress notification for one added thought.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Thoughts recorded so far.
    pub progress: u32,
    /// Planned total.
    pub total: u32,
    /// Summary attached to this thought, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_summary: Option<String>,
}

/// Receives progress as thoughts are added.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called after each thought is committed.
    async fn report(&self, progress: Progress);
}

#[async_trait]
impl ProgressSink for mpsc::Sender<Progress> {
    async fn report(&self, progress: Progress) {
        let _ = self.send(progress).await;
    }
}

#[async_trait]
impl ProgressSink for mpsc::UnboundedSender<Progress> {
    async fn report(&self, progress: Progress) {
        let _ = self.send(progress);
    }
}

/// Per-call knobs that are not part of the request payload.
#[derive(Clone, Default)]
pub struct ReasonOptions {
    /// Cancels the run between steps.
    pub cancel: Option<CancellationToken>,
    /// Progress receiver.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for ReasonOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasonOptions")
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Result of a successful call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonOutcome {
    /// Session state after the call.
    pub session: Arc<Session>,
    /// Whether the call opened the session.
    pub created: bool,
    /// Thoughts committed by this call.
    pub added: Vec<Thought>,
    /// Thoughts discarded by `rollback_to_step`.
    pub rolled_back: usize,
    /// Whether a thought was refused for exceeding the level's budget.
    pub budget_exhausted: bool,
}

impl ReasonOutcome {
    /// Session ID.
    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }
}

/// Orchestrator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Session cache limits.
    pub cache: CacheConfig,
    /// Concurrent `run_task` calls allowed.
    pub max_concurrent_tasks: usize,
}

impl From<&PonderSettings> for OrchestratorConfig {
    fn from(settings: &PonderSettings) -> Self {
        Self {
            cache: CacheConfig::from(settings),
            max_concurrent_tasks: settings.tasks.max_concurrent,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&PonderSettings::default())
    }
}
