//! Provider adapter trait and per-provider implementations

pub mod anthropic;
pub mod google;
pub mod huggingface;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use ultrai_core::{ErrorKind, Provider, ProviderError, ResponseEnvelope};

/// One completion call against one provider's API
///
/// Adapters never raise: every outcome, including transport failures and
/// unparseable bodies, is returned as an envelope.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter speaks to
    fn provider(&self) -> Provider;

    /// Whether credentials were configured for this provider
    fn is_configured(&self) -> bool;

    /// Perform one completion call bounded by `timeout`
    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> ResponseEnvelope;
}

/// Classify a non-success HTTP response into a normalized error
///
/// `sniff_body` enables quota-phrase detection in error bodies for
/// providers that throttle without a 429.
pub(crate) fn classify_http_failure(status: StatusCode, body: &str, sniff_body: bool) -> ProviderError {
    let code = status.as_u16();

    let kind = match code {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::UnsupportedModel,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        400..=499 => {
            if sniff_body && body_mentions_rate_limit(body) {
                ErrorKind::RateLimited
            } else {
                ErrorKind::Upstream4xx
            }
        }
        _ => ErrorKind::Upstream5xx,
    };

    let message = match kind {
        ErrorKind::Auth => format!("authentication rejected ({code})"),
        ErrorKind::UnsupportedModel => format!("model not known to provider ({code})"),
        ErrorKind::RateLimited => format!("rate limited ({code})"),
        _ => format!("provider returned {code}: {}", truncate(body, 200)),
    };

    ProviderError::new(kind, message).with_status(code)
}

/// Classify a reqwest transport error
pub(crate) fn classify_transport_error(error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::new(ErrorKind::Timeout, "request deadline exceeded")
    } else if error.is_decode() {
        ProviderError::new(ErrorKind::MalformedResponse, format!("response decode failed: {error}"))
    } else {
        ProviderError::new(ErrorKind::Network, format!("transport failure: {error}"))
    }
}

/// Envelope for a provider without configured credentials
pub(crate) fn missing_key_envelope(provider: Provider) -> ResponseEnvelope {
    ResponseEnvelope::error(ProviderError::new(
        ErrorKind::Auth,
        format!("no API key configured for {provider}"),
    ))
}

/// Quota phrases that signal throttling regardless of status code
fn body_mentions_rate_limit(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("quota exceeded")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}
