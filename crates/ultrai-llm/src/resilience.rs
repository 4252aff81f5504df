//! Resilient wrapper around a provider adapter
//!
//! Adds per-call deadlines, bounded retries with jittered exponential
//! backoff, and a circuit breaker. Ordering is fixed: circuit check,
//! attempt, classify, breaker update, backoff, retry. Synthetic
//! `circuit_open` results never feed the breaker.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use ultrai_config::AdapterConfig;
use ultrai_core::{ErrorKind, ModelId, Provider, ProviderError, ResponseEnvelope};

use crate::breaker::{Admission, CircuitBreaker, CircuitState};
use crate::health::{HealthOutcome, HealthRegistry};
use crate::provider::ProviderAdapter;

/// A provider adapter wrapped with retries and a circuit breaker
pub struct ResilientClient {
    adapter: Arc<dyn ProviderAdapter>,
    config: AdapterConfig,
    breaker: CircuitBreaker,
    health: Arc<HealthRegistry>,
    retry_rate_limited: bool,
    rate_limit_window: Duration,
}

impl ResilientClient {
    /// Wrap an adapter
    ///
    /// `rate_limit_window` is how long the provider is excluded after a
    /// throttled response; it is never shorter than the backoff cap.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        config: AdapterConfig,
        health: Arc<HealthRegistry>,
        retry_rate_limited: bool,
        rate_limit_window: Duration,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.cb_failure_threshold,
            Duration::from_millis(config.cb_reset_after_ms),
        );
        let rate_limit_window = rate_limit_window.max(Duration::from_millis(config.backoff_max_ms));

        Self {
            adapter,
            config,
            breaker,
            health,
            retry_rate_limited,
            rate_limit_window,
        }
    }

    /// The wrapped provider
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.adapter.provider()
    }

    /// Whether the adapter has credentials
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.adapter.is_configured()
    }

    /// Current circuit state, for observability
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Perform one resilient call bounded by `deadline`
    ///
    /// Always returns an envelope within the deadline plus bookkeeping.
    /// May return a synthetic `circuit_open` error without contacting the
    /// provider.
    pub async fn call(&self, model: &ModelId, prompt: &str, deadline: Instant) -> ResponseEnvelope {
        match self.breaker.admit() {
            Admission::Admitted => {}
            Admission::Probe => {
                tracing::debug!(provider = %self.provider(), "circuit half-open, probing");
            }
            Admission::Rejected => {
                return ResponseEnvelope::error(ProviderError::new(
                    ErrorKind::CircuitOpen,
                    format!("circuit open for {}", self.provider()),
                ));
            }
        }

        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..self.config.max_attempts {
            let now = Instant::now();
            if now >= deadline {
                return deadline_envelope(last_error);
            }

            let per_attempt = (deadline - now).min(Duration::from_millis(self.config.request_timeout_ms));

            // The adapter enforces its own timeout; this outer bound also
            // covers adapters that misbehave
            let envelope = match tokio::time::timeout(per_attempt, self.adapter.generate(&model.name, prompt, per_attempt)).await
            {
                Ok(envelope) => envelope,
                Err(_) => ResponseEnvelope::error(ProviderError::new(
                    ErrorKind::Timeout,
                    "call exceeded its deadline",
                )),
            };

            let error = match envelope {
                ResponseEnvelope::Success { .. } => {
                    self.breaker.record_success();
                    self.health.record(self.provider(), &HealthOutcome::Ok);
                    return envelope;
                }
                ResponseEnvelope::Error { error } => error,
            };

            self.breaker.record_failure();
            self.health.record(self.provider(), &outcome_for(&error, self.rate_limit_window));

            let backoff = match error.kind {
                ErrorKind::RateLimited => {
                    if !self.retry_rate_limited {
                        return ResponseEnvelope::error(error);
                    }
                    // Throttled: back off by the full cap rather than the ladder
                    jittered(Duration::from_millis(self.config.backoff_max_ms))
                }
                kind if kind.is_retryable() => jittered(self.backoff_for(attempt)),
                _ => {
                    return ResponseEnvelope::error(error);
                }
            };

            tracing::debug!(
                provider = %self.provider(),
                model = %model,
                attempt,
                kind = %error.kind,
                backoff = ?backoff,
                "retryable failure"
            );
            last_error = Some(error);

            if attempt + 1 >= self.config.max_attempts {
                break;
            }

            // Only sleep when the wake-up still fits inside the deadline
            let wake = Instant::now() + backoff;
            if wake >= deadline {
                return deadline_envelope(last_error);
            }
            tokio::time::sleep_until(wake).await;
        }

        deadline_envelope(last_error)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .config
            .backoff_base_ms
            .saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exponential.min(self.config.backoff_max_ms))
    }
}

/// Translate the final failure into the returned envelope
fn deadline_envelope(last_error: Option<ProviderError>) -> ResponseEnvelope {
    ResponseEnvelope::error(last_error.unwrap_or_else(|| {
        ProviderError::new(ErrorKind::Timeout, "deadline exhausted before any attempt completed")
    }))
}

/// Map a classified error onto a health outcome
fn outcome_for(error: &ProviderError, rate_limit_window: Duration) -> HealthOutcome {
    match error.kind {
        ErrorKind::RateLimited => HealthOutcome::RateLimited(rate_limit_window),
        ErrorKind::Auth => HealthOutcome::Auth(error.message.clone()),
        ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Upstream5xx => {
            HealthOutcome::Transient(error.message.clone())
        }
        _ => HealthOutcome::Terminal(error.message.clone()),
    }
}

fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(0.5..1.5))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use ultrai_config::PipelineConfig;

    use super::*;

    /// Adapter returning a scripted sequence of envelopes
    struct ScriptedAdapter {
        script: Mutex<Vec<ResponseEnvelope>>,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<ResponseEnvelope>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider(&self) -> Provider {
            Provider::Openai
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, _model: &str, _prompt: &str, _timeout: Duration) -> ResponseEnvelope {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                ResponseEnvelope::success("fallback")
            } else {
                script.remove(0)
            }
        }
    }

    fn transient() -> ResponseEnvelope {
        ResponseEnvelope::error(ProviderError::new(ErrorKind::Upstream5xx, "server error"))
    }

    fn health() -> Arc<HealthRegistry> {
        Arc::new(HealthRegistry::new(
            &PipelineConfig::default(),
            &[Provider::Openai, Provider::Anthropic],
        ))
    }

    fn config() -> AdapterConfig {
        AdapterConfig {
            request_timeout_ms: 1_000,
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            cb_failure_threshold: 5,
            cb_reset_after_ms: 1_000,
        }
    }

    fn client(adapter: Arc<ScriptedAdapter>, config: AdapterConfig) -> ResilientClient {
        ResilientClient::new(adapter, config, health(), true, Duration::from_secs(300))
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let adapter = ScriptedAdapter::new(vec![
            transient(),
            transient(),
            ResponseEnvelope::success("third time lucky"),
        ]);
        let client = client(Arc::clone(&adapter), config());

        let envelope = client
            .call(&ModelId::parse("gpt-4"), "hello", far_deadline())
            .await;

        assert!(envelope.is_success());
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failures_are_not_retried() {
        let adapter = ScriptedAdapter::new(vec![ResponseEnvelope::error(ProviderError::new(
            ErrorKind::Auth,
            "bad key",
        ))]);
        let client = client(Arc::clone(&adapter), config());

        let envelope = client
            .call(&ModelId::parse("gpt-4"), "hello", far_deadline())
            .await;

        assert_eq!(envelope.as_error().unwrap().kind, ErrorKind::Auth);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let adapter = ScriptedAdapter::new(vec![transient(), transient(), transient(), transient()]);
        let client = client(Arc::clone(&adapter), config());

        let envelope = client
            .call(&ModelId::parse("gpt-4"), "hello", far_deadline())
            .await;

        assert_eq!(envelope.as_error().unwrap().kind, ErrorKind::Upstream5xx);
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_threshold_and_fails_fast() {
        let adapter = ScriptedAdapter::new(
            std::iter::repeat_with(transient).take(10).collect(),
        );
        let tight = AdapterConfig {
            max_attempts: 1,
            cb_failure_threshold: 3,
            cb_reset_after_ms: 60_000,
            ..config()
        };
        let client = client(Arc::clone(&adapter), tight);
        let model = ModelId::parse("gpt-4");

        for _ in 0..3 {
            let envelope = client.call(&model, "hello", far_deadline()).await;
            assert_eq!(envelope.as_error().unwrap().kind, ErrorKind::Upstream5xx);
        }
        assert_eq!(adapter.calls(), 3);

        // Threshold reached: the next call is refused without an HTTP call
        let envelope = client.call(&model, "hello", far_deadline()).await;
        assert_eq!(envelope.as_error().unwrap().kind, ErrorKind::CircuitOpen);
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_marks_the_health_window() {
        let adapter = ScriptedAdapter::new(vec![ResponseEnvelope::error(ProviderError::new(
            ErrorKind::RateLimited,
            "slow down",
        ))]);
        let registry = health();
        let client = ResilientClient::new(
            Arc::clone(&adapter) as Arc<dyn ProviderAdapter>,
            AdapterConfig {
                max_attempts: 1,
                ..config()
            },
            Arc::clone(&registry),
            false,
            Duration::from_secs(300),
        );

        let envelope = client
            .call(&ModelId::parse("gpt-4"), "hello", far_deadline())
            .await;

        assert_eq!(envelope.as_error().unwrap().kind, ErrorKind::RateLimited);
        assert!(!registry.is_eligible(Provider::Openai));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_retry_loop() {
        let adapter = ScriptedAdapter::new(std::iter::repeat_with(transient).take(50).collect());
        let slow = AdapterConfig {
            max_attempts: 10,
            backoff_base_ms: 400,
            backoff_max_ms: 400,
            ..config()
        };
        let client = client(Arc::clone(&adapter), slow);

        let start = Instant::now();
        let deadline = start + Duration::from_millis(1_000);
        let envelope = client.call(&ModelId::parse("gpt-4"), "hello", deadline).await;

        assert!(!envelope.is_success());
        // Paused clock: elapsed time is exactly what the loop consumed
        assert!(Instant::now() <= deadline + Duration::from_millis(250));
    }
}
