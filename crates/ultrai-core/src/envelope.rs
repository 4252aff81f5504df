use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified failure reasons for provider calls
///
/// Kinds, not types: every upstream failure is mapped onto one of these
/// before it leaves the adapter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credentials
    Auth,
    /// Upstream throttling (HTTP 429 or an explicit quota message)
    RateLimited,
    /// Deadline exceeded anywhere below the orchestrator
    Timeout,
    /// Connection reset, DNS, or TLS failure
    Network,
    /// Provider server error (5xx)
    Upstream5xx,
    /// Provider client error other than 408/429
    Upstream4xx,
    /// Response parsing failed
    MalformedResponse,
    /// Requested model unknown to the provider
    UnsupportedModel,
    /// Synthetic: circuit breaker refused the call, no request was made
    CircuitOpen,
    /// Pipeline-level gate failed (not enough eligible providers)
    ServiceUnavailable,
    /// Prompt-extraction invariant broken
    InternalPromptLost,
}

impl ErrorKind {
    /// Whether a call failing with this kind may succeed on retry
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::Network | Self::Upstream5xx
        )
    }

    /// Stable snake_case name, matching the serde representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Upstream5xx => "upstream_5xx",
            Self::Upstream4xx => "upstream_4xx",
            Self::MalformedResponse => "malformed_response",
            Self::UnsupportedModel => "unsupported_model",
            Self::CircuitOpen => "circuit_open",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalPromptLost => "internal_prompt_lost",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized provider error carried inside an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    /// Classified failure reason
    pub kind: ErrorKind,
    /// Human-readable description, safe to surface to clients
    pub message: String,
    /// Whether the resilient wrapper may retry this failure
    pub retryable: bool,
    /// HTTP status returned by the provider, when one was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<u16>,
}

impl ProviderError {
    /// Build an error with retryability derived from the kind
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            provider_status: None,
        }
    }

    /// Attach the upstream HTTP status
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.provider_status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Provider-reported token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated in the completion
    pub completion_tokens: u32,
}

/// Normalized result of one provider call
///
/// Exactly one of generated text or a classified error. Adapters never
/// raise; this is the only observable outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    /// Successful completion
    Success {
        /// Generated text extracted from the provider response
        generated_text: String,
        /// Token usage, when the provider reported it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    /// Classified failure
    Error {
        /// The normalized error
        error: ProviderError,
    },
}

impl ResponseEnvelope {
    /// Successful envelope without usage data
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success {
            generated_text: text.into(),
            usage: None,
        }
    }

    /// Successful envelope with provider-reported usage
    #[must_use]
    pub fn success_with_usage(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self::Success {
            generated_text: text.into(),
            usage: Some(usage),
        }
    }

    /// Error envelope
    #[must_use]
    pub const fn error(error: ProviderError) -> Self {
        Self::Error { error }
    }

    /// Whether this envelope carries generated text
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The contained error, if any
    #[must_use]
    pub const fn as_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Error { error } => Some(error),
            Self::Success { .. } => None,
        }
    }

    /// The text carried between stages
    ///
    /// Error envelopes substitute a fixed `Error: <message>` string so the
    /// string-carrying channel stays total across a stage.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Success { generated_text, .. } => generated_text.clone(),
            Self::Error { error } => format!("Error: {}", error.message),
        }
    }
}
