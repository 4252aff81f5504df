use std::fmt;

use serde::{Deserialize, Serialize};

/// Upstream LLM provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI chat completions API
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Generative Language API
    Google,
    /// HuggingFace inference API
    Huggingface,
}

impl Provider {
    /// All providers, in declaration order
    pub const ALL: [Self; 4] = [Self::Openai, Self::Anthropic, Self::Google, Self::Huggingface];

    /// Infer the provider from a model name prefix
    ///
    /// The inference is total: any name that matches no known prefix is
    /// attributed to HuggingFace, which serves arbitrary hub models.
    #[must_use]
    pub fn from_model_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("gpt") {
            Self::Openai
        } else if lower.starts_with("claude") {
            Self::Anthropic
        } else if lower.starts_with("gemini") {
            Self::Google
        } else {
            Self::Huggingface
        }
    }

    /// Lowercase provider name as used in config and API responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Huggingface => "huggingface",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one model at one provider
///
/// Two `ModelId`s are equal only when both the provider and the
/// provider-specific name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    /// Owning provider
    pub provider: Provider,
    /// Provider-specific model name
    pub name: String,
}

impl ModelId {
    /// Build a `ModelId` from a bare model name, inferring the provider
    #[must_use]
    pub fn parse(name: &str) -> Self {
        Self {
            provider: Provider::from_model_name(name),
            name: name.to_owned(),
        }
    }

    /// Build a `ModelId` with an explicit provider
    #[must_use]
    pub fn new(provider: Provider, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
