use std::fmt;

use http::StatusCode;
use indexmap::IndexMap;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ultrai_core::{ErrorKind, HttpError, ModelId, Provider, ResponseEnvelope};

/// One of the three pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Parallel fan-out with the verbatim user query
    InitialResponse,
    /// Cross-model critique of the initial answers
    PeerReview,
    /// Single-model combination of the reviewed answers
    UltraSynthesis,
}

impl StageKind {
    /// Stable snake_case name, matching the serde representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitialResponse => "initial_response",
            Self::PeerReview => "peer_review",
            Self::UltraSynthesis => "ultra_synthesis",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Include initial-stage outputs in the HTTP response body
    pub include_initial_responses: bool,
    /// Run the peer-review stage when enough models succeed
    pub include_peer_review: bool,
    /// Stream stage progress as events
    pub stream: bool,
    /// Per-stage deadline override in milliseconds
    pub per_stage_timeout_ms: Option<u64>,
    /// Whole-pipeline deadline override in milliseconds
    pub global_deadline_ms: Option<u64>,
    /// Preferred synthesis lead; must be eligible to be honored
    pub lead_model: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            include_initial_responses: true,
            include_peer_review: true,
            stream: false,
            per_stage_timeout_ms: None,
            global_deadline_ms: None,
            lead_model: None,
        }
    }
}

/// One pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// The user's query, carried verbatim into every stage
    pub query: String,
    /// Models to fan out to, order preserved end to end
    pub requested_models: Vec<ModelId>,
    /// Per-request options
    pub options: PipelineOptions,
}

/// A model that produced no usable output in a stage
#[derive(Debug, Clone, Serialize)]
pub struct FailedModel {
    /// The failing model
    pub model: ModelId,
    /// Classified reason
    pub kind: ErrorKind,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of one stage
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Which stage ran
    pub stage: StageKind,
    /// Envelope per participating model, iteration order = request order
    pub outputs: IndexMap<ModelId, ResponseEnvelope>,
    /// Models that returned non-error content
    pub successful_models: Vec<ModelId>,
    /// Models recorded with their failure reason
    pub failed_models: Vec<FailedModel>,
    /// The prompt used, recorded when it is uniform across models
    pub recorded_prompt: Option<String>,
    /// Stage start time
    pub started_at: Timestamp,
    /// Stage finish time
    pub finished_at: Timestamp,
}

impl StageResult {
    /// Wire-shape outputs: model name to carried text
    ///
    /// Error envelopes appear as their `Error: …` substitute so the map is
    /// total over participants.
    #[must_use]
    pub fn wire_outputs(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .outputs
            .iter()
            .map(|(model, envelope)| (model.name.clone(), serde_json::Value::String(envelope.text())))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Names of models that succeeded, in request order
    #[must_use]
    pub fn successful_names(&self) -> Vec<String> {
        self.successful_models.iter().map(|m| m.name.clone()).collect()
    }
}

/// Gate parameters the request was admitted under
#[derive(Debug, Clone, Serialize)]
pub struct GatingInfo {
    /// Distinct-provider floor in force
    pub min_required: usize,
    /// Eligible providers observed at admission
    pub providers_seen: Vec<Provider>,
}

/// Summary attached to the final artifact
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    /// Stages that ran, in order
    pub stages_completed: Vec<StageKind>,
    /// Models that contributed a successful response anywhere
    pub models_used: Vec<String>,
    /// The synthesis lead
    pub lead_model: String,
    /// Gate parameters
    pub gating: GatingInfo,
}

/// Final result of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineArtifact {
    /// The original query
    pub query: String,
    /// Per-stage results, in execution order
    pub stages: Vec<StageResult>,
    /// The lead model's synthesis text
    pub ultra_synthesis: String,
    /// Deterministically formatted rendering of the synthesis
    pub formatted_synthesis: String,
    /// The model that produced the synthesis
    pub lead_model: ModelId,
    /// Run summary
    pub pipeline_info: PipelineInfo,
}

impl PipelineArtifact {
    /// The result of one stage, if it ran
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == kind)
    }
}

/// Pipeline-level failures
///
/// Individual provider failures never surface here; they live in each
/// stage's `failed_models`. These are the invariant violations the
/// orchestrator converts into structured error results.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Not enough distinct eligible providers to admit the request
    #[error("minimum viable provider set not met: {available} of {required} required providers")]
    ServiceUnavailable {
        /// Distinct providers required
        required: usize,
        /// Eligible providers at admission time
        available: usize,
        /// The providers that were eligible
        available_providers: Vec<Provider>,
    },

    /// The original query could not be recovered for the synthesis stage
    #[error("original prompt lost before synthesis")]
    PromptLost,

    /// No model produced a usable initial response
    #[error("no model produced a usable response: {0}")]
    NoSuccessfulResponses(String),

    /// The lead model failed to synthesize
    #[error("synthesis failed: {message}")]
    SynthesisFailed {
        /// What the lead model returned
        message: String,
        /// Best reviewed output, when one exists
        partial: Option<String>,
    },

    /// The streaming client went away; partial results are discarded
    #[error("client disconnected")]
    ClientDisconnected,
}

impl PipelineError {
    /// Stable reason token carried in error payloads
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => "min_models_not_met",
            Self::PromptLost => "prompt_extraction_failed",
            Self::NoSuccessfulResponses(_) => "all_models_failed",
            Self::SynthesisFailed { .. } => "synthesis_failed",
            Self::ClientDisconnected => "client_disconnected",
        }
    }
}

impl HttpError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // Synthesis failure is a gateway error only when a partial
            // reviewed output can be offered in its place
            Self::SynthesisFailed { partial: Some(_), .. } => StatusCode::BAD_GATEWAY,
            Self::PromptLost
            | Self::ClientDisconnected
            | Self::NoSuccessfulResponses(_)
            | Self::SynthesisFailed { partial: None, .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable.as_str(),
            Self::PromptLost => ErrorKind::InternalPromptLost.as_str(),
            Self::NoSuccessfulResponses(_) | Self::SynthesisFailed { .. } => "upstream_failure",
            Self::ClientDisconnected => "client_disconnected",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}
