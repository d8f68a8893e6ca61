//! Reasoning orchestration: request types and the orchestrator itself.

#[allow(clippy::module_inception)]
pub mod orchestrator;
pub mod types;
