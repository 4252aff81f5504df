//! OpenAI chat completions adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use ultrai_core::{ErrorKind, Provider, ProviderError, ResponseEnvelope, TokenUsage};
use url::Url;

use super::{ProviderAdapter, classify_http_failure, classify_transport_error, missing_key_envelope};

/// Default OpenAI API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions adapter
pub struct OpenAiAdapter {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    sniff_rate_limit: bool,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 1],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiAdapter {
    /// Create the adapter with a shared HTTP client
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never
    /// happen).
    #[must_use]
    pub fn new(
        client: Client,
        api_key: Option<SecretString>,
        base_url: Option<Url>,
        sniff_rate_limit: bool,
    ) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL")),
            api_key,
            sniff_rate_limit,
        }
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::Openai
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> ResponseEnvelope {
        let Some(key) = &self.api_key else {
            return missing_key_envelope(Provider::Openai);
        };

        let body = WireRequest {
            model,
            messages: [WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = match self
            .client
            .post(self.completions_url())
            .bearer_auth(key.expose_secret())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = "openai", model, error = %e, "upstream request failed");
                return ResponseEnvelope::error(classify_transport_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = "openai", model, status = %status, "upstream returned error");
            return ResponseEnvelope::error(classify_http_failure(status, &body, self.sniff_rate_limit));
        }

        let wire: WireResponse = match response.json().await {
            Ok(wire) => wire,
            Err(e) => return ResponseEnvelope::error(classify_transport_error(&e)),
        };

        let Some(text) = wire.choices.into_iter().next().and_then(|c| c.message.content) else {
            return ResponseEnvelope::error(ProviderError::new(
                ErrorKind::MalformedResponse,
                "response carried no message content",
            ));
        };

        match wire.usage {
            Some(usage) => ResponseEnvelope::success_with_usage(
                text,
                TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                },
            ),
            None => ResponseEnvelope::success(text),
        }
    }
}
