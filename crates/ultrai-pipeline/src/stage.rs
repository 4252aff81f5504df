//! Stage executor: ordered fan-out with per-provider backpressure
//!
//! All calls for a stage start concurrently and are bounded by the stage
//! deadline. Results are keyed and ordered by the request's model list, no
//! matter which call finishes first, and a failing sibling never cancels
//! the others.

use std::sync::Arc;

use indexmap::IndexMap;
use jiff::Timestamp;
use tokio::task::JoinSet;
use tokio::time::Instant;
use ultrai_core::{ErrorKind, ModelId, ProviderError, ResponseEnvelope};
use ultrai_llm::AdapterRegistry;

use crate::events::{EventSender, EventType};
use crate::types::{FailedModel, StageKind, StageResult};

/// Runs one stage against a set of models
pub struct StageExecutor {
    registry: Arc<AdapterRegistry>,
}

impl StageExecutor {
    /// Create an executor over the shared adapter registry
    #[must_use]
    pub const fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    /// Fan out to `models` in parallel and collect labeled results
    ///
    /// `build_prompt` constructs the per-model prompt, letting stages vary
    /// templates without the executor knowing about them. Events, when a
    /// sender is given, are emitted per model in completion order; the
    /// returned outputs are in request order regardless.
    pub async fn run<F>(
        &self,
        stage: StageKind,
        models: &[ModelId],
        build_prompt: F,
        deadline: Instant,
        events: Option<&EventSender>,
    ) -> StageResult
    where
        F: Fn(&ModelId) -> String,
    {
        let started_at = Timestamp::now();
        let prompts: Vec<String> = models.iter().map(&build_prompt).collect();

        // A uniform prompt (the initial stage) is recorded so the original
        // query can be recovered from the artifact later
        let recorded_prompt = match prompts.as_slice() {
            [first, rest @ ..] if rest.iter().all(|p| p == first) => Some(first.clone()),
            _ => None,
        };

        let mut set = JoinSet::new();
        for (index, (model, prompt)) in models.iter().zip(&prompts).enumerate() {
            let client = self.registry.client(model.provider);
            let semaphore = self.registry.semaphore(model.provider);
            let model = model.clone();
            let prompt = prompt.clone();

            set.spawn(async move {
                // Permit held for the duration of the call; this is the
                // per-provider in-flight cap
                let _permit = semaphore.acquire_owned().await.ok();
                let envelope = client.call(&model, &prompt, deadline).await;
                (index, envelope)
            });
        }

        let mut slots: Vec<Option<ResponseEnvelope>> = vec![None; models.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, envelope)) => {
                    if let Some(events) = events {
                        emit_model_response(events, stage, &models[index], &envelope).await;
                    }
                    slots[index] = Some(envelope);
                }
                Err(join_error) => {
                    tracing::error!(stage = %stage, error = %join_error, "stage task failed");
                }
            }
        }

        let mut outputs = IndexMap::with_capacity(models.len());
        let mut successful_models = Vec::new();
        let mut failed_models = Vec::new();

        for (model, slot) in models.iter().zip(slots) {
            let envelope = slot.unwrap_or_else(|| {
                ResponseEnvelope::error(ProviderError::new(
                    ErrorKind::Network,
                    "stage task terminated abnormally",
                ))
            });

            if let Some(error) = envelope.as_error() {
                failed_models.push(FailedModel {
                    model: model.clone(),
                    kind: error.kind,
                    reason: error.message.clone(),
                });
            } else {
                successful_models.push(model.clone());
            }
            outputs.insert(model.clone(), envelope);
        }

        tracing::info!(
            stage = %stage,
            requested = models.len(),
            succeeded = successful_models.len(),
            failed = failed_models.len(),
            "stage complete"
        );

        StageResult {
            stage,
            outputs,
            successful_models,
            failed_models,
            recorded_prompt,
            started_at,
            finished_at: Timestamp::now(),
        }
    }
}

async fn emit_model_response(events: &EventSender, stage: StageKind, model: &ModelId, envelope: &ResponseEnvelope) {
    let data = envelope.as_error().map_or_else(
        || {
            serde_json::json!({
                "stage": stage,
                "model": model.name,
                "ok": true,
                "text_length": envelope.text().len(),
            })
        },
        |error| {
            serde_json::json!({
                "stage": stage,
                "model": model.name,
                "ok": false,
                "error_kind": error.kind,
            })
        },
    );
    events.emit(EventType::ModelResponse, data).await;
}
