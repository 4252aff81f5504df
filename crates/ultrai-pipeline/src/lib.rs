//! The three-stage synthesis pipeline
//!
//! A query fans out to every eligible model (initial response), the
//! successful models critique each other's answers (peer review), and one
//! lead model folds the reviewed answers into a single Ultra Synthesis.
//! The orchestrator gates on provider viability before any call is made
//! and can stream stage progress as server-sent events.

mod cache;
mod events;
mod format;
mod orchestrator;
pub mod prompts;
mod stage;
mod types;

pub use cache::{ResultCache, fingerprint};
pub use events::{EventSender, EventType, PipelineEvent};
pub use format::format_synthesis;
pub use orchestrator::Orchestrator;
pub use stage::StageExecutor;
pub use types::{
    FailedModel, GatingInfo, PipelineArtifact, PipelineError, PipelineInfo, PipelineOptions, PipelineRequest,
    StageKind, StageResult,
};
