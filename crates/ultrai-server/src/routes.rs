//! Route handlers for the orchestrator API

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use ultrai_core::ModelId;
use ultrai_llm::default_catalog;
use ultrai_pipeline::{Orchestrator, PipelineOptions, PipelineRequest, StageKind, StageResult};

use crate::error::error_response;

/// Build the orchestrator API router
pub fn api_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/orchestrator/analyze", routing::post(analyze))
        .route("/api/orchestrator/analyze/stream", routing::post(analyze_stream))
        .route("/api/orchestrator/status", routing::get(status))
        .route("/api/available-models", routing::get(available_models))
        .route("/healthz", routing::get(healthz))
        .with_state(orchestrator)
}

/// Body of `POST /api/orchestrator/analyze`
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// The user's query
    query: String,
    /// Model names; provider is inferred from each name
    selected_models: Vec<String>,
    /// Optional per-request knobs
    #[serde(default)]
    options: AnalyzeOptions,
}

/// Options accepted on the analyze routes
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeOptions {
    include_initial_responses: Option<bool>,
    include_peer_review: Option<bool>,
    lead_model: Option<String>,
}

impl AnalyzeRequest {
    fn into_pipeline_request(self, stream: bool) -> PipelineRequest {
        let defaults = PipelineOptions::default();
        PipelineRequest {
            query: self.query,
            requested_models: self.selected_models.iter().map(|name| ModelId::parse(name)).collect(),
            options: PipelineOptions {
                include_initial_responses: self
                    .options
                    .include_initial_responses
                    .unwrap_or(defaults.include_initial_responses),
                include_peer_review: self
                    .options
                    .include_peer_review
                    .unwrap_or(defaults.include_peer_review),
                stream,
                lead_model: self.options.lead_model,
                ..defaults
            },
        }
    }
}

/// Handle `POST /api/orchestrator/analyze`
async fn analyze(State(orchestrator): State<Arc<Orchestrator>>, Json(request): Json<AnalyzeRequest>) -> Response {
    let pipeline_request = request.into_pipeline_request(false);

    match orchestrator.execute(&pipeline_request).await {
        Ok(artifact) => {
            let mut results = serde_json::json!({
                "ultra_synthesis": artifact.ultra_synthesis,
                "formatted_synthesis": artifact.formatted_synthesis,
                "status": "completed",
            });

            if pipeline_request.options.include_initial_responses
                && let Some(stage) = artifact.stage(StageKind::InitialResponse)
            {
                results["initial_response"] = stage_json(stage);
            }
            if let Some(stage) = artifact.stage(StageKind::PeerReview) {
                results["peer_review_and_revision"] = stage_json(stage);
            }

            let info = &artifact.pipeline_info;
            let body = serde_json::json!({
                "success": true,
                "results": results,
                "pipeline_info": {
                    "stages_completed": info.stages_completed,
                    "models_used": info.models_used,
                    "lead_model": info.lead_model,
                    "gating": info.gating,
                },
            });
            Json(body).into_response()
        }
        Err(error) => error_response(&error),
    }
}

/// Handle `POST /api/orchestrator/analyze/stream`
async fn analyze_stream(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<AnalyzeRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pipeline_request = request.into_pipeline_request(true);

    let events = orchestrator.execute_stream(pipeline_request).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event.event.as_str()).data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Query string for `GET /api/available-models`
#[derive(Debug, Default, Deserialize)]
struct ModelsQuery {
    #[serde(default)]
    healthy_only: bool,
}

/// Handle `GET /api/available-models`
async fn available_models(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<ModelsQuery>,
) -> Response {
    let health = orchestrator.registry().health();
    let models: Vec<String> = default_catalog()
        .into_iter()
        .filter(|model| !query.healthy_only || health.is_eligible(model.provider))
        .map(|model| model.name)
        .collect();

    Json(serde_json::json!({ "models": models })).into_response()
}

/// Handle `GET /api/orchestrator/status`
async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    let health = orchestrator.registry().health();
    let available = health.available_providers();
    let healthy_models: Vec<String> = default_catalog()
        .into_iter()
        .filter(|model| health.is_eligible(model.provider))
        .map(|model| model.name)
        .collect();
    let min_required = health.min_required();

    Json(serde_json::json!({
        "available_providers": available,
        "healthy_models": healthy_models,
        "min_required": min_required,
        "can_accept_requests": available.len() >= min_required,
        "providers": health.snapshot(),
    }))
    .into_response()
}

/// Handle `GET /healthz`
async fn healthz() -> impl IntoResponse {
    (http::StatusCode::OK, "ok")
}

/// Wire shape of one stage block
fn stage_json(stage: &StageResult) -> serde_json::Value {
    let failed: Vec<serde_json::Value> = stage
        .failed_models
        .iter()
        .map(|f| {
            serde_json::json!({
                "model": f.model.name,
                "kind": f.kind,
                "reason": f.reason,
            })
        })
        .collect();

    serde_json::json!({
        "outputs": stage.wire_outputs(),
        "successful_models": stage.successful_names(),
        "failed_models": failed,
    })
}
