use std::time::Duration;

use serde::Deserialize;
use ultrai_core::Provider;

/// Pipeline gating, deadlines, and provider policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Distinct healthy providers required before any stage runs
    pub minimum_models_required: usize,
    /// Allow the pipeline to run with a single provider
    pub enable_single_model_fallback: bool,
    /// Wall-clock budget for the whole pipeline, in milliseconds
    pub orchestration_timeout_ms: u64,
    /// Deadline for the initial-response stage
    pub initial_response_timeout_ms: Option<u64>,
    /// Deadline for the peer-review stage
    pub peer_review_timeout_ms: Option<u64>,
    /// Deadline for the synthesis stage
    pub ultra_synthesis_timeout_ms: Option<u64>,
    /// Per-call timeout override applied to every adapter
    pub llm_request_timeout_ms: Option<u64>,
    /// Default stage deadline when no stage-specific value is set
    pub concurrent_execution_timeout_ms: Option<u64>,
    /// Retry-attempt override applied to every adapter
    pub max_retry_attempts: Option<u32>,
    /// Map 429s and quota messages to the rate-limited kind
    pub rate_limit_detection_enabled: bool,
    /// Retry rate-limited calls (with the longer backoff)
    pub rate_limit_retry_enabled: bool,
    /// Minutes a health probe result stays fresh
    pub model_health_cache_ttl_minutes: u64,
    /// Minutes a rate-limited provider is kept out of rotation
    pub provider_recovery_window_minutes: u64,
    /// Max in-flight calls per provider within one stage
    pub per_provider_concurrency: usize,
    /// Provider priority when picking the synthesis lead
    pub lead_priority: Vec<Provider>,
    /// Providers that must be eligible for the pipeline to be viable
    pub required_providers: Vec<Provider>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            minimum_models_required: 2,
            enable_single_model_fallback: false,
            orchestration_timeout_ms: 70_000,
            initial_response_timeout_ms: None,
            peer_review_timeout_ms: None,
            ultra_synthesis_timeout_ms: None,
            llm_request_timeout_ms: None,
            concurrent_execution_timeout_ms: None,
            max_retry_attempts: None,
            rate_limit_detection_enabled: true,
            rate_limit_retry_enabled: true,
            model_health_cache_ttl_minutes: 5,
            provider_recovery_window_minutes: 5,
            per_provider_concurrency: 8,
            lead_priority: vec![
                Provider::Anthropic,
                Provider::Google,
                Provider::Openai,
                Provider::Huggingface,
            ],
            required_providers: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Global wall-clock budget for one pipeline run
    #[must_use]
    pub const fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.orchestration_timeout_ms)
    }

    /// Deadline for the initial-response stage
    #[must_use]
    pub fn initial_timeout(&self) -> Duration {
        self.stage_timeout(self.initial_response_timeout_ms)
    }

    /// Deadline for the peer-review stage
    #[must_use]
    pub fn peer_review_timeout(&self) -> Duration {
        self.stage_timeout(self.peer_review_timeout_ms)
    }

    /// Deadline for the synthesis stage
    #[must_use]
    pub fn synthesis_timeout(&self) -> Duration {
        self.stage_timeout(self.ultra_synthesis_timeout_ms)
    }

    /// Rate-limit exclusion window
    #[must_use]
    pub const fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.provider_recovery_window_minutes * 60)
    }

    fn stage_timeout(&self, specific: Option<u64>) -> Duration {
        let ms = specific
            .or(self.concurrent_execution_timeout_ms)
            .unwrap_or(self.orchestration_timeout_ms);
        Duration::from_millis(ms)
    }
}
