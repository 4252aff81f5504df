//! Adapter registry: wires credentials, adapters, resilient wrappers,
//! and the health registry together in that order

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use ultrai_config::Config;
use ultrai_core::{ModelId, Provider};

use crate::breaker::CircuitState;
use crate::health::HealthRegistry;
use crate::provider::{
    ProviderAdapter, anthropic::AnthropicAdapter, google::GoogleAdapter, huggingface::HuggingFaceAdapter,
    openai::OpenAiAdapter,
};
use crate::resilience::ResilientClient;

/// Long-lived provider clients shared by every request
pub struct AdapterRegistry {
    clients: HashMap<Provider, Arc<ResilientClient>>,
    semaphores: HashMap<Provider, Arc<Semaphore>>,
    health: Arc<HealthRegistry>,
}

impl AdapterRegistry {
    /// Build all adapters and wrappers from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let configured: Vec<Provider> = Provider::ALL
            .into_iter()
            .filter(|p| config.providers.get(*p).api_key.is_some())
            .collect();

        let health = Arc::new(HealthRegistry::new(&config.pipeline, &configured));
        let sniff = config.pipeline.rate_limit_detection_enabled;

        let mut clients = HashMap::new();
        let mut semaphores = HashMap::new();

        for provider in Provider::ALL {
            let settings = config.providers.get(provider);
            let key = settings.api_key.clone();
            let base_url = settings.base_url.clone();

            // One pooled HTTP client per provider, shared across requests
            let http = Client::new();
            let adapter: Arc<dyn ProviderAdapter> = match provider {
                Provider::Openai => Arc::new(OpenAiAdapter::new(http, key, base_url, sniff)),
                Provider::Anthropic => Arc::new(AnthropicAdapter::new(http, key, base_url, sniff)),
                Provider::Google => Arc::new(GoogleAdapter::new(http, key, base_url, sniff)),
                Provider::Huggingface => Arc::new(HuggingFaceAdapter::new(http, key, base_url, sniff)),
            };

            let mut adapter_config = settings.adapter_config(provider);
            if let Some(timeout_ms) = config.pipeline.llm_request_timeout_ms {
                adapter_config.request_timeout_ms = timeout_ms;
            }
            if let Some(attempts) = config.pipeline.max_retry_attempts {
                adapter_config.max_attempts = attempts;
            }

            clients.insert(
                provider,
                Arc::new(ResilientClient::new(
                    adapter,
                    adapter_config,
                    Arc::clone(&health),
                    config.pipeline.rate_limit_retry_enabled,
                    config.pipeline.recovery_window(),
                )),
            );
            semaphores.insert(
                provider,
                Arc::new(Semaphore::new(config.pipeline.per_provider_concurrency)),
            );
        }

        Self {
            clients,
            semaphores,
            health,
        }
    }

    /// Resilient client for one provider
    ///
    /// # Panics
    ///
    /// Never panics: every provider is registered at construction.
    #[must_use]
    pub fn client(&self, provider: Provider) -> Arc<ResilientClient> {
        Arc::clone(self.clients.get(&provider).expect("all providers registered"))
    }

    /// In-flight cap for one provider
    ///
    /// # Panics
    ///
    /// Never panics: every provider is registered at construction.
    #[must_use]
    pub fn semaphore(&self, provider: Provider) -> Arc<Semaphore> {
        Arc::clone(self.semaphores.get(&provider).expect("all providers registered"))
    }

    /// Shared health registry
    #[must_use]
    pub const fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Circuit state per provider, for observability
    pub fn circuit_states(&self) -> Vec<(Provider, CircuitState)> {
        Provider::ALL
            .into_iter()
            .filter_map(|p| self.clients.get(&p).map(|c| (p, c.circuit_state())))
            .collect()
    }
}

/// Models this process knows about before any request is served
#[must_use]
pub fn default_catalog() -> Vec<ModelId> {
    [
        "gpt-4",
        "gpt-4o",
        "gpt-4o-mini",
        "claude-3-5-sonnet-20241022",
        "claude-3-5-haiku-20241022",
        "gemini-1.5-pro",
        "gemini-1.5-flash",
        "mistralai/Mistral-7B-Instruct-v0.3",
        "meta-llama/Meta-Llama-3-8B-Instruct",
    ]
    .into_iter()
    .map(ModelId::parse)
    .collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn keyless_providers_are_unavailable_at_startup() {
        let mut config = Config::default();
        config.providers.get_mut(Provider::Openai).api_key = Some(SecretString::from("sk-test"));

        let registry = AdapterRegistry::from_config(&config);
        assert!(registry.health().is_eligible(Provider::Openai));
        assert!(!registry.health().is_eligible(Provider::Anthropic));
        assert!(registry.client(Provider::Openai).is_configured());
        assert!(!registry.client(Provider::Google).is_configured());
    }

    #[test]
    fn catalog_spans_all_providers() {
        let catalog = default_catalog();
        for provider in Provider::ALL {
            assert!(catalog.iter().any(|m| m.provider == provider));
        }
    }
}
