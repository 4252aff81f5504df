//! HuggingFace serverless inference adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use ultrai_core::{ErrorKind, Provider, ProviderError, ResponseEnvelope};
use url::Url;

use super::{ProviderAdapter, classify_http_failure, classify_transport_error, missing_key_envelope};

/// Default HuggingFace inference API base URL
const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

/// Generation cap for hub models
const MAX_NEW_TOKENS: u32 = 1_024;

/// HuggingFace inference adapter
///
/// Serves arbitrary hub models; the model name is part of the URL path.
pub struct HuggingFaceAdapter {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    sniff_rate_limit: bool,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    inputs: &'a str,
    parameters: WireParameters,
}

#[derive(Serialize)]
struct WireParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

/// The inference API returns a one-element array of generations
#[derive(Deserialize)]
struct WireGeneration {
    #[serde(default)]
    generated_text: Option<String>,
}

impl HuggingFaceAdapter {
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

    fn model_url(&self, model: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/models/{model}")
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn provider(&self) -> Provider {
        Provider::Huggingface
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> ResponseEnvelope {
        let Some(key) = &self.api_key else {
            return missing_key_envelope(Provider::Huggingface);
        };

        let body = WireRequest {
            inputs: prompt,
            parameters: WireParameters {
                max_new_tokens: MAX_NEW_TOKENS,
                return_full_text: false,
            },
        };

        let response = match self
            .client
            .post(self.model_url(model))
            .bearer_auth(key.expose_secret())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = "huggingface", model, error = %e, "upstream request failed");
                return ResponseEnvelope::error(classify_transport_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = "huggingface", model, status = %status, "upstream returned error");
            return ResponseEnvelope::error(classify_http_failure(status, &body, self.sniff_rate_limit));
        }

        let generations: Vec<WireGeneration> = match response.json().await {
            Ok(generations) => generations,
            Err(e) => return ResponseEnvelope::error(classify_transport_error(&e)),
        };

        match generations.into_iter().next().and_then(|g| g.generated_text) {
            Some(text) if !text.is_empty() => ResponseEnvelope::success(text),
            _ => ResponseEnvelope::error(ProviderError::new(
                ErrorKind::MalformedResponse,
                "response carried no generated text",
            )),
        }
    }
}
