//! Mock provider backend for integration tests
//!
//! One server exposes OpenAI-, Anthropic-, and Gemini-shaped completion
//! routes with canned responses, so a single instance can stand in for
//! any provider. Behavior is scripted per instance: fail the first N
//! requests with a chosen status, delay every response, or always
//! succeed with fixed text.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use tokio_util::sync::CancellationToken;

/// Scripted behavior for a mock provider
pub struct MockBehavior {
    /// Text returned on success
    pub response_text: String,
    /// Fail this many requests before succeeding (`i64::MAX` = always)
    pub fail_first: i64,
    /// Status used for scripted failures
    pub fail_status: u16,
    /// Added latency per request
    pub delay: Option<Duration>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            response_text: "Hello from mock provider".to_owned(),
            fail_first: 0,
            fail_status: 500,
            delay: None,
        }
    }
}

struct MockState {
    response_text: String,
    failures_left: AtomicI64,
    fail_status: u16,
    delay: Option<Duration>,
    hits: AtomicU32,
    bodies: Mutex<Vec<String>>,
}

/// A running mock provider
pub struct MockProvider {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockProvider {
    /// Start a mock that always succeeds with the default text
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(MockBehavior::default()).await
    }

    /// Start a mock that always succeeds with the given text
    pub async fn start_with_response(text: &str) -> anyhow::Result<Self> {
        Self::start_with(MockBehavior {
            response_text: text.to_owned(),
            ..MockBehavior::default()
        })
        .await
    }

    /// Start a mock with fully scripted behavior
    pub async fn start_with(behavior: MockBehavior) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            response_text: behavior.response_text,
            failures_left: AtomicI64::new(behavior.fail_first),
            fail_status: behavior.fail_status,
            delay: behavior.delay,
            hits: AtomicU32::new(0),
            bodies: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/chat/completions", routing::post(handle_openai))
            .route("/messages", routing::post(handle_anthropic))
            .route("/models/{model_action}", routing::post(handle_google))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL to configure as a provider's `base_url`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Completion requests received so far
    pub fn hits(&self) -> u32 {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Raw request bodies received, in arrival order
    pub fn bodies(&self) -> Vec<String> {
        self.state.bodies.lock().unwrap().clone()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Record the hit and decide whether this request is scripted to fail
async fn admit(state: &MockState, body: &str) -> Option<StatusCode> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body.to_owned());

    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    if state.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
        Some(StatusCode::from_u16(state.fail_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
    } else {
        None
    }
}

async fn handle_openai(State(state): State<Arc<MockState>>, body: String) -> Response {
    if let Some(status) = admit(&state, &body).await {
        return (status, Json(serde_json::json!({"error": {"message": "scripted failure"}}))).into_response();
    }

    Json(serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": state.response_text}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 20},
    }))
    .into_response()
}

async fn handle_anthropic(State(state): State<Arc<MockState>>, body: String) -> Response {
    if let Some(status) = admit(&state, &body).await {
        return (status, Json(serde_json::json!({"error": {"message": "scripted failure"}}))).into_response();
    }

    Json(serde_json::json!({
        "content": [{"type": "text", "text": state.response_text}],
        "usage": {"input_tokens": 10, "output_tokens": 20},
    }))
    .into_response()
}

async fn handle_google(State(state): State<Arc<MockState>>, body: String) -> Response {
    if let Some(status) = admit(&state, &body).await {
        return (status, Json(serde_json::json!({"error": {"message": "scripted failure"}}))).into_response();
    }

    Json(serde_json::json!({
        "candidates": [{"content": {"parts": [{"text": state.response_text}]}}],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 20},
    }))
    .into_response()
}
