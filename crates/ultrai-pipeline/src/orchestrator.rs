//! Pipeline orchestrator
//!
//! Sequences the three stages, enforces the viability gate before any
//! provider is contacted, recovers the original query for the synthesis
//! prompt, selects the lead model, and optionally streams progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use ultrai_config::PipelineConfig;
use ultrai_core::{HttpError, ModelId, ResponseEnvelope};
use ultrai_llm::AdapterRegistry;

use crate::cache::{ResultCache, fingerprint};
use crate::events::{EventSender, EventType, PipelineEvent};
use crate::format::format_synthesis;
use crate::prompts::{self, LabeledResponse};
use crate::stage::StageExecutor;
use crate::types::{
    GatingInfo, PipelineArtifact, PipelineError, PipelineInfo, PipelineRequest, StageKind, StageResult,
};

/// Drives the three-stage pipeline over the shared adapter registry
pub struct Orchestrator {
    registry: Arc<AdapterRegistry>,
    executor: StageExecutor,
    config: PipelineConfig,
    cache: Option<ResultCache>,
}

impl Orchestrator {
    /// Create the orchestrator; `cache` enables fingerprint result reuse
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, config: PipelineConfig, cache: Option<ResultCache>) -> Self {
        let executor = StageExecutor::new(Arc::clone(&registry));
        Self {
            registry,
            executor,
            config,
            cache,
        }
    }

    /// The shared adapter registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Execute the pipeline to completion
    ///
    /// Identical concurrent requests are coalesced when the cache is
    /// enabled; only one underlying pipeline runs.
    ///
    /// # Errors
    ///
    /// Returns a structured [`PipelineError`] for gate failures, prompt
    /// loss, or synthesis failure. Individual provider failures are not
    /// errors; they appear in each stage's `failed_models`.
    pub async fn execute(&self, request: &PipelineRequest) -> Result<Arc<PipelineArtifact>, PipelineError> {
        let span = tracing::info_span!("pipeline", run_id = %next_run_id());
        async {
            if let Some(cache) = &self.cache {
                let key = fingerprint(&request.query, &request.requested_models, &request.options);
                cache.get_or_run(&key, || self.run(request, None)).await
            } else {
                self.run(request, None).await.map(Arc::new)
            }
        }
        .instrument(span)
        .await
    }

    /// Execute the pipeline, streaming progress events
    ///
    /// The returned stream yields events with strictly increasing sequence
    /// numbers. Dropping the stream cancels the run; outstanding provider
    /// calls are abandoned and partial results discarded.
    #[must_use]
    pub fn execute_stream(self: &Arc<Self>, request: PipelineRequest) -> ReceiverStream<PipelineEvent> {
        let (sender, rx) = EventSender::channel(64);
        let this = Arc::clone(self);
        let span = tracing::info_span!("pipeline", run_id = %next_run_id());

        tokio::spawn(
            async move {
                match this.run(&request, Some(&sender)).await {
                    Ok(_) | Err(PipelineError::ClientDisconnected) => {}
                    Err(error) => {
                        sender
                            .emit(
                                EventType::PipelineError,
                                serde_json::json!({
                                    "kind": error.error_type(),
                                    "message": error.client_message(),
                                }),
                            )
                            .await;
                    }
                }
            }
            .instrument(span),
        );

        ReceiverStream::new(rx)
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        request: &PipelineRequest,
        events: Option<&EventSender>,
    ) -> Result<PipelineArtifact, PipelineError> {
        let started = std::time::Instant::now();
        let global_budget = request
            .options
            .global_deadline_ms
            .map_or_else(|| self.config.global_deadline(), Duration::from_millis);
        let global_deadline = Instant::now() + global_budget;

        let health = self.registry.health();

        // Gate before any provider is contacted
        if !health.viable(&request.requested_models) {
            let available_providers = health.eligible_providers(&request.requested_models);
            return Err(PipelineError::ServiceUnavailable {
                required: health.min_required(),
                available: available_providers.len(),
                available_providers,
            });
        }

        if request.query.trim().is_empty() {
            return Err(PipelineError::PromptLost);
        }

        let (eligible, excluded) = health.filter(&request.requested_models);
        for (model, reason) in &excluded {
            tracing::warn!(model = %model, reason, "model excluded from pipeline");
        }

        let model_names: Vec<&str> = request.requested_models.iter().map(|m| m.name.as_str()).collect();
        self.emit(
            events,
            EventType::PipelineStart,
            serde_json::json!({
                "query_fingerprint": fingerprint(&request.query, &request.requested_models, &request.options),
                "models_requested": model_names,
            }),
        )
        .await?;

        // Stage 1: every eligible model answers the verbatim query
        let initial = self
            .run_stage(
                StageKind::InitialResponse,
                &eligible,
                |_| request.query.clone(),
                global_deadline,
                request,
                events,
            )
            .await?;

        if initial.successful_models.is_empty() {
            return Err(PipelineError::NoSuccessfulResponses(format!(
                "all {} models failed in the initial stage",
                initial.outputs.len()
            )));
        }

        // Stage 2: peers critique each other when at least two answers exist
        let run_review = request.options.include_peer_review && initial.successful_models.len() >= 2;
        let peer_review = if run_review {
            let initial_answers = labeled_successes(&initial);
            let query = request.query.clone();
            let reviewers = initial.successful_models.clone();

            let stage = self
                .run_stage(
                    StageKind::PeerReview,
                    &reviewers,
                    move |reviewer| {
                        let own = initial_answers
                            .iter()
                            .find(|r| r.model == *reviewer)
                            .expect("reviewer succeeded in stage 1");
                        let peers: Vec<&LabeledResponse> =
                            initial_answers.iter().filter(|r| r.model != *reviewer).collect();
                        prompts::peer_review(&query, own, &peers)
                    },
                    global_deadline,
                    request,
                    events,
                )
                .await?;
            Some(stage)
        } else {
            tracing::info!(
                successes = initial.successful_models.len(),
                include_peer_review = request.options.include_peer_review,
                "skipping peer review"
            );
            None
        };

        // Stage 3 consumes reviewed answers, falling back to the initial
        // answer for any model whose review failed
        let reviewed = latest_answers(&initial, peer_review.as_ref());
        let synthesis_query = extract_query(request, &initial)?;
        let lead = self.select_lead(request, &initial.successful_models, &reviewed)?;

        let synthesis_prompt = prompts::ultra_synthesis(&synthesis_query, &reviewed);
        let synthesis = self
            .run_stage(
                StageKind::UltraSynthesis,
                std::slice::from_ref(&lead),
                move |_| synthesis_prompt.clone(),
                global_deadline,
                request,
                events,
            )
            .await?;

        let envelope = synthesis.outputs.get(&lead);
        let ultra_synthesis = match envelope {
            Some(ResponseEnvelope::Success { generated_text, .. }) => generated_text.clone(),
            _ => {
                let message = envelope
                    .and_then(ResponseEnvelope::as_error)
                    .map_or_else(|| "lead model produced no output".to_owned(), |e| e.message.clone());
                return Err(PipelineError::SynthesisFailed {
                    message,
                    partial: best_partial(health.pick_lead(&initial.successful_models).as_ref(), &reviewed),
                });
            }
        };

        for chunk in ultra_synthesis.split("\n\n").filter(|c| !c.trim().is_empty()) {
            self.emit(events, EventType::SynthesisChunk, serde_json::json!({"text": chunk}))
                .await?;
        }

        let formatted_synthesis = format_synthesis(&ultra_synthesis);

        let mut models_used: Vec<String> = initial.successful_names();
        if !models_used.contains(&lead.name) {
            models_used.push(lead.name.clone());
        }

        let mut stages = vec![initial];
        let mut stages_completed = vec![StageKind::InitialResponse];
        if let Some(stage) = peer_review {
            stages_completed.push(StageKind::PeerReview);
            stages.push(stage);
        }
        stages_completed.push(StageKind::UltraSynthesis);
        stages.push(synthesis);

        let providers_seen = health.eligible_providers(&request.requested_models);

        self.emit(
            events,
            EventType::PipelineComplete,
            serde_json::json!({
                "lead_model": lead.name,
                "total_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        )
        .await?;

        Ok(PipelineArtifact {
            query: request.query.clone(),
            stages,
            ultra_synthesis,
            formatted_synthesis,
            lead_model: lead.clone(),
            pipeline_info: PipelineInfo {
                stages_completed,
                models_used,
                lead_model: lead.name,
                gating: GatingInfo {
                    min_required: health.min_required(),
                    providers_seen,
                },
            },
        })
    }

    /// Run one stage under its deadline, bracketed by start/complete events
    async fn run_stage<F>(
        &self,
        stage: StageKind,
        models: &[ModelId],
        build_prompt: F,
        global_deadline: Instant,
        request: &PipelineRequest,
        events: Option<&EventSender>,
    ) -> Result<StageResult, PipelineError>
    where
        F: Fn(&ModelId) -> String,
    {
        self.emit(events, EventType::StageStart, serde_json::json!({"stage": stage}))
            .await?;

        let deadline = self.stage_deadline(stage, request, global_deadline);
        let result = self.executor.run(stage, models, build_prompt, deadline, events).await;

        self.emit(
            events,
            EventType::StageComplete,
            serde_json::json!({
                "stage": stage,
                "successful_models": result.successful_names(),
                "failed_models": result.failed_models,
            }),
        )
        .await?;

        Ok(result)
    }

    /// Stage deadline: the per-stage budget clamped by the global deadline
    fn stage_deadline(&self, stage: StageKind, request: &PipelineRequest, global_deadline: Instant) -> Instant {
        let budget = request.options.per_stage_timeout_ms.map_or_else(
            || match stage {
                StageKind::InitialResponse => self.config.initial_timeout(),
                StageKind::PeerReview => self.config.peer_review_timeout(),
                StageKind::UltraSynthesis => self.config.synthesis_timeout(),
            },
            Duration::from_millis,
        );
        (Instant::now() + budget).min(global_deadline)
    }

    /// Choose the synthesis lead: the request override when eligible,
    /// otherwise the health registry's priority pick
    fn select_lead(
        &self,
        request: &PipelineRequest,
        candidates: &[ModelId],
        reviewed: &[LabeledResponse],
    ) -> Result<ModelId, PipelineError> {
        let health = self.registry.health();

        if let Some(name) = &request.options.lead_model {
            let preferred = ModelId::parse(name);
            if health.is_eligible(preferred.provider) {
                return Ok(preferred);
            }
            tracing::warn!(lead = %preferred, "requested lead model not eligible, falling back to priority order");
        }

        health.pick_lead(candidates).ok_or_else(|| PipelineError::SynthesisFailed {
            message: "no eligible lead model among successful responders".to_owned(),
            partial: reviewed.first().map(|r| r.text.clone()),
        })
    }

    /// Emit an event when streaming; a closed channel cancels the run
    async fn emit(
        &self,
        events: Option<&EventSender>,
        event: EventType,
        data: serde_json::Value,
    ) -> Result<(), PipelineError> {
        if let Some(sender) = events
            && !sender.emit(event, data).await
        {
            tracing::info!("event stream closed, cancelling pipeline");
            return Err(PipelineError::ClientDisconnected);
        }
        Ok(())
    }
}

/// Short unique id for correlating one run's log lines
fn next_run_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{now:x}{count:04x}")
}

/// Labeled successful outputs of a stage, in stage order
fn labeled_successes(stage: &StageResult) -> Vec<LabeledResponse> {
    stage
        .successful_models
        .iter()
        .filter_map(|model| {
            stage.outputs.get(model).map(|envelope| LabeledResponse {
                model: model.clone(),
                text: envelope.text(),
            })
        })
        .collect()
}

/// The freshest answer per model: the peer-reviewed text when the review
/// succeeded, the initial answer otherwise
fn latest_answers(initial: &StageResult, peer_review: Option<&StageResult>) -> Vec<LabeledResponse> {
    initial
        .successful_models
        .iter()
        .filter_map(|model| {
            let reviewed = peer_review.and_then(|stage| {
                stage
                    .outputs
                    .get(model)
                    .filter(|envelope| envelope.is_success())
                    .map(ResponseEnvelope::text)
            });
            let text = reviewed.or_else(|| initial.outputs.get(model).map(ResponseEnvelope::text))?;
            Some(LabeledResponse {
                model: model.clone(),
                text,
            })
        })
        .collect()
}

/// Recover the query for the synthesis prompt
///
/// The request's own query is authoritative; the prompt recorded in the
/// initial stage is the fallback. There is deliberately no placeholder
/// substitution: losing the prompt is an error.
fn extract_query(request: &PipelineRequest, initial: &StageResult) -> Result<String, PipelineError> {
    if !request.query.trim().is_empty() {
        return Ok(request.query.clone());
    }

    if let Some(prompt) = &initial.recorded_prompt
        && !prompt.trim().is_empty()
    {
        return Ok(prompt.clone());
    }

    Err(PipelineError::PromptLost)
}

/// The text offered alongside a synthesis failure
fn best_partial(preferred: Option<&ModelId>, reviewed: &[LabeledResponse]) -> Option<String> {
    preferred
        .and_then(|lead| reviewed.iter().find(|r| r.model == *lead))
        .or_else(|| reviewed.first())
        .map(|r| r.text.clone())
}
