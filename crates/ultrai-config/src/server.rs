use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server settings
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address; defaults to `0.0.0.0:8085`
    #[serde(default)]
    pub listen_address: Option<SocketAddr>,
}

/// Optional fingerprint result cache
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Whether completed artifacts are cached
    pub enabled: bool,
    /// Entry time-to-live in seconds
    pub ttl_seconds: u64,
    /// Maximum cached artifacts
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: 600,
            max_entries: 1_024,
        }
    }
}
