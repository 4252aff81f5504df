use std::path::Path;
use std::str::FromStr;

use secrecy::SecretString;
use ultrai_core::Provider;

use crate::Config;

/// Environment variable carrying the API key for each provider
const fn key_var(provider: Provider) -> &'static str {
    match provider {
        Provider::Openai => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GOOGLE_API_KEY",
        Provider::Huggingface => "HUGGINGFACE_API_KEY",
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, deserializes,
    /// layers the documented environment variables on top, and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, expansion fails, TOML
    /// parsing fails, an override variable is malformed, or validation fails.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded = crate::env::expand_env(&raw)
            .map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let mut config: Self =
            toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Build configuration from environment variables alone
    ///
    /// # Errors
    ///
    /// Returns an error if an override variable is malformed or validation
    /// fails.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Layer the documented environment variables over the current values
    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        for provider in Provider::ALL {
            if let Ok(key) = std::env::var(key_var(provider))
                && !key.is_empty()
            {
                self.providers.get_mut(provider).api_key = Some(SecretString::from(key));
            }
        }

        override_parsed("MINIMUM_MODELS_REQUIRED", &mut self.pipeline.minimum_models_required)?;
        override_parsed(
            "ENABLE_SINGLE_MODEL_FALLBACK",
            &mut self.pipeline.enable_single_model_fallback,
        )?;
        override_parsed("ORCHESTRATION_TIMEOUT", &mut self.pipeline.orchestration_timeout_ms)?;
        override_optional("INITIAL_RESPONSE_TIMEOUT", &mut self.pipeline.initial_response_timeout_ms)?;
        override_optional("PEER_REVIEW_TIMEOUT", &mut self.pipeline.peer_review_timeout_ms)?;
        override_optional("ULTRA_SYNTHESIS_TIMEOUT", &mut self.pipeline.ultra_synthesis_timeout_ms)?;
        override_optional("LLM_REQUEST_TIMEOUT", &mut self.pipeline.llm_request_timeout_ms)?;
        override_optional(
            "CONCURRENT_EXECUTION_TIMEOUT",
            &mut self.pipeline.concurrent_execution_timeout_ms,
        )?;
        override_optional("MAX_RETRY_ATTEMPTS", &mut self.pipeline.max_retry_attempts)?;
        override_parsed(
            "RATE_LIMIT_DETECTION_ENABLED",
            &mut self.pipeline.rate_limit_detection_enabled,
        )?;
        override_parsed("RATE_LIMIT_RETRY_ENABLED", &mut self.pipeline.rate_limit_retry_enabled)?;
        override_parsed(
            "MODEL_HEALTH_CACHE_TTL_MINUTES",
            &mut self.pipeline.model_health_cache_ttl_minutes,
        )?;
        override_parsed(
            "PROVIDER_RECOVERY_WINDOW_MINUTES",
            &mut self.pipeline.provider_recovery_window_minutes,
        )?;

        Ok(())
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error when gating or adapter settings are unusable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.minimum_models_required == 0 {
            anyhow::bail!("pipeline.minimum_models_required must be at least 1");
        }

        if self.pipeline.per_provider_concurrency == 0 {
            anyhow::bail!("pipeline.per_provider_concurrency must be at least 1");
        }

        if self.pipeline.lead_priority.is_empty() {
            anyhow::bail!("pipeline.lead_priority must not be empty");
        }

        for provider in Provider::ALL {
            let adapter = self.providers.get(provider).adapter_config(provider);
            if adapter.max_attempts == 0 {
                anyhow::bail!("providers.{provider}.adapter.max_attempts must be at least 1");
            }
            if adapter.backoff_base_ms > adapter.backoff_max_ms {
                anyhow::bail!("providers.{provider}.adapter backoff base exceeds its cap");
            }
        }

        Ok(())
    }
}

/// Overwrite `target` when the variable is set and parses
fn override_parsed<T: FromStr>(var: &str, target: &mut T) -> anyhow::Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var)
        && !raw.is_empty()
    {
        *target = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {var}: {e}"))?;
    }
    Ok(())
}

/// Like `override_parsed`, wrapping the parsed value in `Some`
fn override_optional<T: FromStr>(var: &str, target: &mut Option<T>) -> anyhow::Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var)
        && !raw.is_empty()
    {
        *target = Some(
            raw.parse()
                .map_err(|e| anyhow::anyhow!("invalid value for {var}: {e}"))?,
        );
    }
    Ok(())
}
