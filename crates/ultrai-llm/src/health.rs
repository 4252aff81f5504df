//! Process-wide provider health and fallback policy
//!
//! The registry is written by resilient-wrapper outcomes and read by the
//! stage executor and orchestrator. Mutation is serialized per provider
//! through the map's sharded locks; no lock is held across I/O.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use ultrai_config::PipelineConfig;
use ultrai_core::{ModelId, Provider};

/// Health of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Accepting requests
    Healthy,
    /// Excluded until the window elapses
    RateLimited {
        /// When the provider re-enters rotation
        until: Instant,
    },
    /// Not usable (no key, or credentials rejected)
    Unavailable,
}

/// Outcome of a resilient call, as reported to the registry
#[derive(Debug, Clone)]
pub enum HealthOutcome {
    /// Call succeeded
    Ok,
    /// Retryable failure (timeout, network, 5xx)
    Transient(String),
    /// Non-retryable failure other than auth
    Terminal(String),
    /// Credentials rejected; provider is out until they change
    Auth(String),
    /// Upstream throttled; exclude for the window
    RateLimited(Duration),
}

struct HealthRecord {
    status: ProviderStatus,
    last_error: Option<String>,
    consecutive_failures: u32,
    keyless: bool,
}

/// Serializable view of one provider's health
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthView {
    /// Provider name
    pub provider: Provider,
    /// Status label: healthy, rate_limited, or unavailable
    pub status: &'static str,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Most recent error message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Provider health map plus the gating and lead-selection policy
pub struct HealthRegistry {
    records: DashMap<Provider, HealthRecord>,
    min_models: usize,
    single_model_fallback: bool,
    required: Vec<Provider>,
    priority: Vec<Provider>,
}

impl HealthRegistry {
    /// Build the registry; providers not in `configured` have no API key
    /// and stay unavailable for the process lifetime
    #[must_use]
    pub fn new(pipeline: &PipelineConfig, configured: &[Provider]) -> Self {
        let records = DashMap::new();
        for provider in Provider::ALL {
            let keyless = !configured.contains(&provider);
            records.insert(
                provider,
                HealthRecord {
                    status: if keyless {
                        ProviderStatus::Unavailable
                    } else {
                        ProviderStatus::Healthy
                    },
                    last_error: keyless.then(|| "no API key configured".to_owned()),
                    consecutive_failures: 0,
                    keyless,
                },
            );
        }

        Self {
            records,
            min_models: pipeline.minimum_models_required,
            single_model_fallback: pipeline.enable_single_model_fallback,
            required: pipeline.required_providers.clone(),
            priority: pipeline.lead_priority.clone(),
        }
    }

    /// Whether a provider may serve requests right now
    ///
    /// An expired rate-limit window flips the provider back to healthy.
    pub fn is_eligible(&self, provider: Provider) -> bool {
        let Some(mut record) = self.records.get_mut(&provider) else {
            return false;
        };

        match record.status {
            ProviderStatus::Healthy => true,
            ProviderStatus::Unavailable => false,
            ProviderStatus::RateLimited { until } => {
                if Instant::now() >= until {
                    record.status = ProviderStatus::Healthy;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Split a model list into eligible and excluded, preserving order
    pub fn filter(&self, models: &[ModelId]) -> (Vec<ModelId>, Vec<(ModelId, String)>) {
        let mut eligible = Vec::with_capacity(models.len());
        let mut excluded = Vec::new();

        for model in models {
            if self.is_eligible(model.provider) {
                eligible.push(model.clone());
            } else {
                let reason = self
                    .records
                    .get(&model.provider)
                    .and_then(|r| r.last_error.clone())
                    .unwrap_or_else(|| "provider unavailable".to_owned());
                excluded.push((model.clone(), reason));
            }
        }

        (eligible, excluded)
    }

    /// Record the outcome of a resilient call
    ///
    /// Keyless providers never change state. Recording `Ok` is idempotent.
    pub fn record(&self, provider: Provider, outcome: &HealthOutcome) {
        let Some(mut record) = self.records.get_mut(&provider) else {
            return;
        };
        if record.keyless {
            return;
        }

        match outcome {
            HealthOutcome::Ok => {
                record.status = ProviderStatus::Healthy;
                record.consecutive_failures = 0;
                record.last_error = None;
            }
            HealthOutcome::Transient(message) | HealthOutcome::Terminal(message) => {
                record.consecutive_failures += 1;
                record.last_error = Some(message.clone());
            }
            HealthOutcome::Auth(message) => {
                record.status = ProviderStatus::Unavailable;
                record.consecutive_failures += 1;
                record.last_error = Some(message.clone());
            }
            HealthOutcome::RateLimited(window) => {
                let until = Instant::now() + *window;
                // Windows only ever extend; a shorter report never shrinks one
                let effective = match record.status {
                    ProviderStatus::RateLimited { until: existing } if existing > until => existing,
                    _ => until,
                };
                record.status = ProviderStatus::RateLimited { until: effective };
                record.consecutive_failures += 1;
                record.last_error = Some("rate limited".to_owned());
                drop(record);
                tracing::warn!(provider = %provider, "provider placed in rate-limit window");
            }
        }
    }

    /// Highest-priority eligible model among the candidates
    ///
    /// Candidate order breaks ties within a provider.
    pub fn pick_lead(&self, candidates: &[ModelId]) -> Option<ModelId> {
        for provider in &self.priority {
            if !self.is_eligible(*provider) {
                continue;
            }
            if let Some(model) = candidates.iter().find(|m| m.provider == *provider) {
                return Some(model.clone());
            }
        }
        None
    }

    /// Distinct eligible providers among the given models, in model order
    pub fn eligible_providers(&self, models: &[ModelId]) -> Vec<Provider> {
        let mut providers = Vec::new();
        for model in models {
            if self.is_eligible(model.provider) && !providers.contains(&model.provider) {
                providers.push(model.provider);
            }
        }
        providers
    }

    /// Whether the pipeline may run against these models
    ///
    /// Requires enough distinct eligible providers and every explicitly
    /// required provider to be eligible.
    pub fn viable(&self, models: &[ModelId]) -> bool {
        let providers = self.eligible_providers(models);

        if providers.len() < self.effective_min() {
            return false;
        }

        self.required.iter().all(|p| providers.contains(p))
    }

    /// The distinct-provider floor currently enforced
    #[must_use]
    pub const fn min_required(&self) -> usize {
        if self.single_model_fallback { 1 } else { self.min_models }
    }

    /// All currently eligible providers
    pub fn available_providers(&self) -> Vec<Provider> {
        Provider::ALL.into_iter().filter(|p| self.is_eligible(*p)).collect()
    }

    /// Health view of every provider, for the status endpoint
    pub fn snapshot(&self) -> Vec<ProviderHealthView> {
        Provider::ALL
            .into_iter()
            .filter_map(|provider| {
                self.records.get(&provider).map(|record| ProviderHealthView {
                    provider,
                    status: match record.status {
                        ProviderStatus::Healthy => "healthy",
                        ProviderStatus::RateLimited { .. } => "rate_limited",
                        ProviderStatus::Unavailable => "unavailable",
                    },
                    consecutive_failures: record.consecutive_failures,
                    last_error: record.last_error.clone(),
                })
            })
            .collect()
    }

    const fn effective_min(&self) -> usize {
        self.min_required()
    }
}
