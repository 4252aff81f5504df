//! Optional fingerprint-keyed result cache
//!
//! Completed artifacts are cached under a SHA-256 fingerprint of the
//! normalized request. Concurrent requests with the same fingerprint are
//! coalesced so only one underlying pipeline runs; the rest wait and read
//! the fresh entry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mini_moka::sync::Cache;
use sha2::{Digest, Sha256};
use ultrai_config::CacheConfig;
use ultrai_core::ModelId;

use crate::types::{PipelineArtifact, PipelineError, PipelineOptions};

/// Compute the cache fingerprint for a request
///
/// Hashes the trimmed query, the sorted model set, and the options that
/// change the output. Model order does not affect the key; output shaping
/// options do.
#[must_use]
pub fn fingerprint(query: &str, models: &[ModelId], options: &PipelineOptions) -> String {
    let mut sorted: Vec<String> = models
        .iter()
        .map(|m| format!("{}/{}", m.provider, m.name))
        .collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(query.trim().as_bytes());
    hasher.update([0]);
    for entry in &sorted {
        hasher.update(entry.as_bytes());
        hasher.update([0]);
    }
    hasher.update([u8::from(options.include_peer_review)]);
    hasher.update(options.lead_model.as_deref().unwrap_or("").as_bytes());

    format!("{:x}", hasher.finalize())
}

/// In-process TTL cache with single-flight admission
pub struct ResultCache {
    entries: Cache<String, Arc<PipelineArtifact>>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ResultCache {
    /// Build the cache from configuration
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(Duration::from_secs(config.ttl_seconds))
                .build(),
            in_flight: DashMap::new(),
        }
    }

    /// Look up a cached artifact
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<PipelineArtifact>> {
        self.entries.get(&key.to_owned())
    }

    /// Run `produce` unless an identical request is cached or in flight
    ///
    /// Losers of the admission race wait for the winner and read its
    /// entry. Errors are not cached; a failed producer lets the next
    /// waiter try again.
    ///
    /// # Errors
    ///
    /// Propagates the producer's pipeline error.
    pub async fn get_or_run<F, Fut>(&self, key: &str, produce: F) -> Result<Arc<PipelineArtifact>, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PipelineArtifact, PipelineError>>,
    {
        if let Some(hit) = self.get(key) {
            tracing::debug!(key, "result cache hit");
            return Ok(hit);
        }

        // Clone the gate out before awaiting; holding a map guard across
        // an await would block unrelated keys on the same shard
        let gate = {
            let entry = self.in_flight.entry(key.to_owned()).or_default();
            Arc::clone(entry.value())
        };
        let _guard = gate.lock().await;

        // The winner may have populated the cache while we waited
        if let Some(hit) = self.get(key) {
            tracing::debug!(key, "result cache hit after single-flight wait");
            return Ok(hit);
        }

        let result = produce().await;

        // Publish the entry before releasing the gate: a caller arriving
        // between the two steps must observe the cache hit, never a window
        // where neither the entry nor the gate exists
        match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                self.entries.insert(key.to_owned(), Arc::clone(&artifact));
                self.in_flight.remove(key);
                Ok(artifact)
            }
            Err(error) => {
                self.in_flight.remove(key);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use ultrai_core::Provider;

    use super::*;
    use crate::types::{GatingInfo, PipelineInfo, StageKind};

    fn artifact() -> PipelineArtifact {
        PipelineArtifact {
            query: "q".to_owned(),
            stages: Vec::new(),
            ultra_synthesis: "s".to_owned(),
            formatted_synthesis: "# Ultra Synthesis\n\ns".to_owned(),
            lead_model: ModelId::parse("claude-3-opus"),
            pipeline_info: PipelineInfo {
                stages_completed: vec![StageKind::InitialResponse, StageKind::UltraSynthesis],
                models_used: vec!["claude-3-opus".to_owned()],
                lead_model: "claude-3-opus".to_owned(),
                gating: GatingInfo {
                    min_required: 2,
                    providers_seen: vec![Provider::Anthropic, Provider::Openai],
                },
            },
        }
    }

    fn models() -> Vec<ModelId> {
        vec![ModelId::parse("gpt-4"), ModelId::parse("claude-3-opus")]
    }

    #[test]
    fn fingerprint_ignores_model_order_and_padding() {
        let options = PipelineOptions::default();
        let forward = fingerprint("  What is Q?  ", &models(), &options);
        let mut reversed_models = models();
        reversed_models.reverse();
        let reversed = fingerprint("What is Q?", &reversed_models, &options);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn fingerprint_varies_with_query_and_options() {
        let options = PipelineOptions::default();
        let base = fingerprint("What is Q?", &models(), &options);
        assert_ne!(base, fingerprint("What is R?", &models(), &options));

        let no_review = PipelineOptions {
            include_peer_review: false,
            ..PipelineOptions::default()
        };
        assert_ne!(base, fingerprint("What is Q?", &models(), &no_review));
    }

    #[tokio::test]
    async fn concurrent_identical_requests_run_once() {
        let cache = Arc::new(ResultCache::new(&CacheConfig {
            enabled: true,
            ttl_seconds: 60,
            max_entries: 16,
        }));
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_run("key", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(artifact())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = ResultCache::new(&CacheConfig::default());

        let failed = cache
            .get_or_run("key", || async { Err(PipelineError::PromptLost) })
            .await;
        assert!(failed.is_err());

        // The next caller gets a fresh attempt
        let ok = cache.get_or_run("key", || async { Ok(artifact()) }).await;
        assert!(ok.is_ok());
        assert!(cache.get("key").is_some());
    }
}
