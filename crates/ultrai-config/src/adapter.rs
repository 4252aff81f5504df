use secrecy::SecretString;
use serde::Deserialize;
use ultrai_core::Provider;
use url::Url;

/// Reliability tuning for one provider's adapter
///
/// The per-provider defaults are contractual; a config file or environment
/// override changes them deliberately, never silently.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdapterConfig {
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum attempts per call, including the first
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds
    pub backoff_max_ms: u64,
    /// Consecutive failures that trip the circuit breaker
    pub cb_failure_threshold: u32,
    /// Milliseconds an open circuit waits before admitting a probe
    pub cb_reset_after_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::defaults_for(Provider::Openai)
    }
}

impl AdapterConfig {
    /// Contractual defaults per provider
    #[must_use]
    pub const fn defaults_for(provider: Provider) -> Self {
        match provider {
            Provider::Openai => Self {
                request_timeout_ms: 30_000,
                max_attempts: 3,
                backoff_base_ms: 250,
                backoff_max_ms: 5_000,
                cb_failure_threshold: 5,
                cb_reset_after_ms: 30_000,
            },
            Provider::Anthropic => Self {
                request_timeout_ms: 45_000,
                max_attempts: 2,
                backoff_base_ms: 500,
                backoff_max_ms: 8_000,
                cb_failure_threshold: 3,
                cb_reset_after_ms: 30_000,
            },
            Provider::Google => Self {
                request_timeout_ms: 25_000,
                max_attempts: 4,
                backoff_base_ms: 250,
                backoff_max_ms: 5_000,
                cb_failure_threshold: 6,
                cb_reset_after_ms: 30_000,
            },
            Provider::Huggingface => Self {
                request_timeout_ms: 60_000,
                max_attempts: 2,
                backoff_base_ms: 500,
                backoff_max_ms: 10_000,
                cb_failure_threshold: 3,
                cb_reset_after_ms: 60_000,
            },
        }
    }
}

/// Settings for a single provider
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    /// API key; absence makes every model of this provider unavailable
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override (used by tests and self-hosted gateways)
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Adapter reliability tuning; defaults are per-provider
    #[serde(default)]
    pub adapter: Option<AdapterConfig>,
}

impl ProviderSettings {
    /// Effective adapter config: explicit settings or the provider defaults
    #[must_use]
    pub fn adapter_config(&self, provider: Provider) -> AdapterConfig {
        self.adapter
            .clone()
            .unwrap_or_else(|| AdapterConfig::defaults_for(provider))
    }
}

/// Per-provider configuration table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    /// OpenAI settings
    #[serde(default)]
    pub openai: ProviderSettings,
    /// Anthropic settings
    #[serde(default)]
    pub anthropic: ProviderSettings,
    /// Google settings
    #[serde(default)]
    pub google: ProviderSettings,
    /// HuggingFace settings
    #[serde(default)]
    pub huggingface: ProviderSettings,
}

impl ProvidersConfig {
    /// Settings for one provider
    #[must_use]
    pub const fn get(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Openai => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::Huggingface => &self.huggingface,
        }
    }

    /// Mutable settings for one provider
    pub const fn get_mut(&mut self, provider: Provider) -> &mut ProviderSettings {
        match provider {
            Provider::Openai => &mut self.openai,
            Provider::Anthropic => &mut self.anthropic,
            Provider::Google => &mut self.google,
            Provider::Huggingface => &mut self.huggingface,
        }
    }
}
