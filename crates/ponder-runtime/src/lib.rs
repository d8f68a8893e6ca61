//! # ponder-runtime
//!
//! Reasoning orchestration over the session cache.
//!
//! - **Orchestrator**: [`ReasoningOrchestrator`] resolves or opens a session,
//!   applies rollback and new thoughts under the session lock, enforces the
//!   level token budget and finishes the session when its plan is met
//! - **Session lock**: [`SessionLock`], FIFO mutual exclusion per session ID
//! - **Task limiter**: [`TaskLimiter`], non-blocking cap on concurrent tasks
//! - **Errors**: [`ReasoningError`] with stable codes and [`ErrorPayload`]
//!
//! ## Crate Position
//!
//! Top of the stack. Depends on ponder-core, ponder-settings and
//! ponder-sessions.

#![deny(unsafe_code)]

pub mod errors;
pub mod limiter;
pub mod lock;
pub mod orchestrator;

pub use errors::{ErrorPayload, ReasoningError, Result};
pub use limiter::{TaskLimiter, TaskPermit};
pub use lock::{SessionGuard, SessionLock};
pub use orchestrator::orchestrator::ReasoningOrchestrator;
pub use orchestrator::types::{
    OrchestratorConfig, Progress, ProgressSink, ReasonOptions, ReasonOutcome, ReasonRequest,
};
