//! Configuration for the UltrAI orchestration service
//!
//! Configuration is layered: an optional TOML file (with `{{ env.VAR }}`
//! expansion) provides the base, and the documented environment variables
//! override it. Adapter defaults per provider are contractual and apply
//! when neither layer specifies a value.

mod adapter;
mod env;
mod loader;
mod pipeline;
mod server;

use serde::Deserialize;

pub use adapter::{AdapterConfig, ProviderSettings, ProvidersConfig};
pub use env::expand_env;
pub use pipeline::PipelineConfig;
pub use server::{CacheConfig, ServerConfig};

/// Top-level service configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Pipeline gating, timeouts, and policy
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Per-provider credentials and adapter tuning
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Optional result cache
    #[serde(default)]
    pub cache: CacheConfig,
}
