//! Anthropic Messages API adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use ultrai_core::{ErrorKind, Provider, ProviderError, ResponseEnvelope, TokenUsage};
use url::Url;

use super::{ProviderAdapter, classify_http_failure, classify_transport_error, missing_key_envelope};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output budget per completion; the messages API requires an explicit cap
const MAX_TOKENS: u32 = 4_096;

/// Anthropic Messages API adapter
pub struct AnthropicAdapter {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    sniff_rate_limit: bool,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [WireMessage<'a>; 1],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicAdapter {
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

    fn messages_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/messages")
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> ResponseEnvelope {
        let Some(key) = &self.api_key else {
            return missing_key_envelope(Provider::Anthropic);
        };

        let body = WireRequest {
            model,
            max_tokens: MAX_TOKENS,
            messages: [WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = match self
            .client
            .post(self.messages_url())
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = "anthropic", model, error = %e, "upstream request failed");
                return ResponseEnvelope::error(classify_transport_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = "anthropic", model, status = %status, "upstream returned error");
            return ResponseEnvelope::error(classify_http_failure(status, &body, self.sniff_rate_limit));
        }

        let wire: WireResponse = match response.json().await {
            Ok(wire) => wire,
            Err(e) => return ResponseEnvelope::error(classify_transport_error(&e)),
        };

        // Concatenate text blocks; tool-use blocks are not requested
        let text: String = wire
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if text.is_empty() {
            return ResponseEnvelope::error(ProviderError::new(
                ErrorKind::MalformedResponse,
                "response carried no text content blocks",
            ));
        }

        match wire.usage {
            Some(usage) => ResponseEnvelope::success_with_usage(
                text,
                TokenUsage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                },
            ),
            None => ResponseEnvelope::success(text),
        }
    }
}
