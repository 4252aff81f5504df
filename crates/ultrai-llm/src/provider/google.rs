//! Google Generative Language API adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use ultrai_core::{ErrorKind, Provider, ProviderError, ResponseEnvelope, TokenUsage};
use url::Url;

use super::{ProviderAdapter, classify_http_failure, classify_transport_error, missing_key_envelope};

/// Default Google Generative Language API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Throttle marker downstream consumers match on for Gemini
const QUOTA_MESSAGE: &str = "Quota exceeded (rate limit)";

/// Google Gemini `generateContent` adapter
pub struct GoogleAdapter {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    sniff_rate_limit: bool,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    contents: [WireContent<'a>; 1],
}

#[derive(Serialize)]
struct WireContent<'a> {
    parts: [WirePart<'a>; 1],
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireCandidateContent>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

impl GoogleAdapter {
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

    fn generate_url(&self, model: &str, api_key: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/models/{model}:generateContent?key={api_key}")
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> ResponseEnvelope {
        let Some(key) = &self.api_key else {
            return missing_key_envelope(Provider::Google);
        };

        let body = WireRequest {
            contents: [WireContent {
                parts: [WirePart { text: prompt }],
            }],
        };

        let url = self.generate_url(model, key.expose_secret());

        let response = match self.client.post(&url).timeout(timeout).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = "google", model, error = %e, "upstream request failed");
                return ResponseEnvelope::error(classify_transport_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = "google", model, status = %status, "upstream returned error");
            let mut error = classify_http_failure(status, &body, self.sniff_rate_limit);
            // Gemini throttle errors carry a fixed marker that rate-limit
            // detection downstream matches on
            if error.kind == ErrorKind::RateLimited {
                error.message = format!("{QUOTA_MESSAGE} for model {model}");
            }
            return ResponseEnvelope::error(error);
        }

        let wire: WireResponse = match response.json().await {
            Ok(wire) => wire,
            Err(e) => return ResponseEnvelope::error(classify_transport_error(&e)),
        };

        let text: String = wire
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return ResponseEnvelope::error(ProviderError::new(
                ErrorKind::MalformedResponse,
                "response carried no candidate text",
            ));
        }

        match wire.usage_metadata {
            Some(usage) => ResponseEnvelope::success_with_usage(
                text,
                TokenUsage {
                    prompt_tokens: usage.prompt_token_count,
                    completion_tokens: usage.candidates_token_count,
                },
            ),
            None => ResponseEnvelope::success(text),
        }
    }
}
