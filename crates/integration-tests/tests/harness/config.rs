//! Config builder for tests: real config structs pointed at mock backends

use secrecy::SecretString;
use ultrai_config::{AdapterConfig, Config};
use ultrai_core::Provider;
use url::Url;

/// Adapter tuning that keeps tests fast: short timeouts, tiny backoff,
/// and a breaker threshold high enough to stay out of the way unless a
/// test wants it
pub fn fast_adapter() -> AdapterConfig {
    AdapterConfig {
        request_timeout_ms: 2_000,
        max_attempts: 2,
        backoff_base_ms: 10,
        backoff_max_ms: 20,
        cb_failure_threshold: 100,
        cb_reset_after_ms: 200,
    }
}

/// Builds a `Config` wired to mock provider servers
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Configure a provider with a key and a mock base URL
    pub fn with_provider(mut self, provider: Provider, base_url: &str) -> Self {
        let settings = self.config.providers.get_mut(provider);
        settings.api_key = Some(SecretString::from("test-key"));
        settings.base_url = Some(Url::parse(base_url).expect("valid mock URL"));
        settings.adapter = Some(fast_adapter());
        self
    }

    /// Configure a provider with custom adapter tuning
    pub fn with_provider_adapter(mut self, provider: Provider, base_url: &str, adapter: AdapterConfig) -> Self {
        let settings = self.config.providers.get_mut(provider);
        settings.api_key = Some(SecretString::from("test-key"));
        settings.base_url = Some(Url::parse(base_url).expect("valid mock URL"));
        settings.adapter = Some(adapter);
        self
    }

    /// Set the distinct-provider gate
    pub fn min_models(mut self, n: usize) -> Self {
        self.config.pipeline.minimum_models_required = n;
        self
    }

    /// Bound the whole pipeline
    pub fn orchestration_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pipeline.orchestration_timeout_ms = ms;
        self
    }

    /// Enable the result cache
    pub fn with_cache(mut self) -> Self {
        self.config.cache.enabled = true;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
