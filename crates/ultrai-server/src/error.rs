//! Mapping pipeline errors onto the HTTP error envelope

use axum::Json;
use axum::response::{IntoResponse, Response};
use ultrai_core::HttpError;
use ultrai_pipeline::PipelineError;

/// Convert a pipeline error into the structured JSON error response
pub fn error_response(error: &PipelineError) -> Response {
    let mut body = serde_json::json!({
        "success": false,
        "error": {
            "kind": error.error_type(),
            "reason": error.reason(),
            "message": error.client_message(),
        },
    });

    match error {
        PipelineError::ServiceUnavailable {
            required,
            available_providers,
            ..
        } => {
            body["error"]["required"] = serde_json::json!(required);
            body["error"]["available_providers"] = serde_json::json!(available_providers);
        }
        PipelineError::SynthesisFailed {
            partial: Some(partial), ..
        } => {
            body["error"]["partial"] = serde_json::json!(true);
            body["partial_response"] = serde_json::json!(partial);
        }
        _ => {}
    }

    (error.status_code(), Json(body)).into_response()
}
