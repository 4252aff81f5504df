//! End-to-end pipeline scenarios against mock provider backends

mod harness;

use std::time::{Duration, Instant};

use harness::config::ConfigBuilder;
use harness::mock_provider::{MockBehavior, MockProvider};
use harness::server::TestServer;
use ultrai_core::Provider;

fn analyze_body(query: &str, models: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "selected_models": models,
    })
}

async fn post_analyze(
    server: &TestServer,
    body: &serde_json::Value,
) -> (reqwest::StatusCode, serde_json::Value) {
    let response = server
        .client()
        .post(server.url("/api/orchestrator/analyze"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    let json = response.json().await.unwrap();
    (status, json)
}

/// Three healthy providers: all stages run and anthropic leads
#[tokio::test]
async fn happy_path_three_providers() {
    let openai = MockProvider::start_with_response("openai answer").await.unwrap();
    let anthropic = MockProvider::start_with_response("anthropic answer").await.unwrap();
    let google = MockProvider::start_with_response("google answer").await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Anthropic, &anthropic.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body(
        "Summarize the CAP theorem in one paragraph.",
        &["gpt-4", "claude-3-5-sonnet-20241022", "gemini-1.5-flash"],
    );
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(
        json["pipeline_info"]["stages_completed"],
        serde_json::json!(["initial_response", "peer_review", "ultra_synthesis"])
    );

    // All three models answered both of the first two stages
    let initial = &json["results"]["initial_response"];
    assert_eq!(initial["successful_models"].as_array().unwrap().len(), 3);
    let review = &json["results"]["peer_review_and_revision"];
    assert_eq!(review["outputs"].as_object().unwrap().len(), 3);

    assert!(!json["results"]["ultra_synthesis"].as_str().unwrap().is_empty());
    assert!(
        json["results"]["formatted_synthesis"]
            .as_str()
            .unwrap()
            .starts_with('#')
    );

    // Anthropic is the preferred lead when available
    assert_eq!(json["pipeline_info"]["lead_model"], "claude-3-5-sonnet-20241022");
    // Initial + peer review + synthesis
    assert_eq!(anthropic.hits(), 3);
    // Initial + peer review only
    assert_eq!(openai.hits(), 2);
    assert_eq!(google.hits(), 2);
}

/// Too few distinct providers: refused up front, nothing is called
#[tokio::test]
async fn gating_failure_makes_no_provider_calls() {
    let openai = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .min_models(3)
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body("anything", &["gpt-4", "invalid-model-x"]);
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 503);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "service_unavailable");
    assert_eq!(json["error"]["reason"], "min_models_not_met");
    assert_eq!(json["error"]["required"], 3);
    assert_eq!(json["error"]["available_providers"], serde_json::json!(["openai"]));

    assert_eq!(openai.hits(), 0);
}

/// One provider throttled: it lands in failed_models, the rest carry on
#[tokio::test]
async fn rate_limited_provider_is_isolated() {
    let openai = MockProvider::start_with(MockBehavior {
        fail_first: i64::MAX,
        fail_status: 429,
        ..MockBehavior::default()
    })
    .await
    .unwrap();
    let anthropic = MockProvider::start_with_response("anthropic answer").await.unwrap();
    let google = MockProvider::start_with_response("google answer").await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Anthropic, &anthropic.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body(
        "query",
        &["gpt-4", "claude-3-5-sonnet-20241022", "gemini-1.5-flash"],
    );
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 200);

    let failed = json["results"]["initial_response"]["failed_models"]
        .as_array()
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["model"], "gpt-4");
    assert_eq!(failed[0]["kind"], "rate_limited");

    // Peer review still ran with the two healthy models
    let review = &json["results"]["peer_review_and_revision"];
    assert_eq!(review["successful_models"].as_array().unwrap().len(), 2);
    assert_eq!(
        json["pipeline_info"]["stages_completed"],
        serde_json::json!(["initial_response", "peer_review", "ultra_synthesis"])
    );
    assert!(!json["results"]["ultra_synthesis"].as_str().unwrap().is_empty());
}

/// A single success skips peer review and synthesizes directly
#[tokio::test]
async fn single_success_skips_peer_review() {
    let openai = MockProvider::start_with_response("the only answer").await.unwrap();
    let anthropic = MockProvider::start_with(MockBehavior {
        fail_first: i64::MAX,
        ..MockBehavior::default()
    })
    .await
    .unwrap();
    let google = MockProvider::start_with(MockBehavior {
        fail_first: i64::MAX,
        ..MockBehavior::default()
    })
    .await
    .unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Anthropic, &anthropic.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body(
        "query",
        &["gpt-4", "claude-3-5-sonnet-20241022", "gemini-1.5-flash"],
    );
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 200);
    assert_eq!(
        json["pipeline_info"]["stages_completed"],
        serde_json::json!(["initial_response", "ultra_synthesis"])
    );
    assert!(json["results"]["peer_review_and_revision"].is_null());
    // The lead comes from the single successful provider
    assert_eq!(json["pipeline_info"]["lead_model"], "gpt-4");
}

/// The global deadline dominates slow providers
#[tokio::test]
async fn global_deadline_dominates() {
    let slow = MockProvider::start_with(MockBehavior {
        delay: Some(Duration::from_secs(5)),
        ..MockBehavior::default()
    })
    .await
    .unwrap();
    let slower = MockProvider::start_with(MockBehavior {
        delay: Some(Duration::from_secs(5)),
        ..MockBehavior::default()
    })
    .await
    .unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &slow.base_url())
        .with_provider(Provider::Anthropic, &slower.base_url())
        .orchestration_timeout_ms(1_000)
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body("query", &["gpt-4", "claude-3-5-sonnet-20241022"]);
    let started = Instant::now();
    let (status, json) = post_analyze(&server, &body).await;

    assert!(started.elapsed() <= Duration::from_millis(1_750));
    // Nothing succeeded, so there is no partial output to offer: internal error
    assert_eq!(status, 500);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["reason"], "all_models_failed");
}

/// The synthesis prompt carries the original query byte for byte
#[tokio::test]
async fn prompt_preserved_into_synthesis() {
    let openai = MockProvider::start().await.unwrap();
    let anthropic = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Anthropic, &anthropic.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body("What is Q?", &["gpt-4", "claude-3-5-sonnet-20241022"]);
    let (status, _) = post_analyze(&server, &body).await;
    assert_eq!(status, 200);

    // Anthropic leads, so its last request is the synthesis call
    let bodies = anthropic.bodies();
    let synthesis_request = bodies.last().unwrap();
    assert!(synthesis_request.contains("What is Q?"));
    for request in bodies.iter().chain(openai.bodies().iter()) {
        assert!(!request.contains("Unknown prompt"));
    }
}

/// A requested lead model overrides the priority order when eligible
#[tokio::test]
async fn lead_model_override_is_honored() {
    let openai = MockProvider::start().await.unwrap();
    let google = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = serde_json::json!({
        "query": "query",
        "selected_models": ["gpt-4", "gemini-1.5-flash"],
        "options": {"lead_model": "gpt-4"},
    });
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 200);
    assert_eq!(json["pipeline_info"]["lead_model"], "gpt-4");
}

/// Initial outputs can be suppressed in the response body
#[tokio::test]
async fn initial_responses_can_be_excluded() {
    let openai = MockProvider::start().await.unwrap();
    let google = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = serde_json::json!({
        "query": "query",
        "selected_models": ["gpt-4", "gemini-1.5-flash"],
        "options": {"include_initial_responses": false},
    });
    let (status, json) = post_analyze(&server, &body).await;

    assert_eq!(status, 200);
    assert!(json["results"]["initial_response"].is_null());
    assert!(!json["results"]["ultra_synthesis"].as_str().unwrap().is_empty());
}

/// Repeated failures trip the breaker; later calls are shed without HTTP
#[tokio::test]
async fn circuit_opens_and_sheds_calls() {
    let failing = MockProvider::start_with(MockBehavior {
        fail_first: i64::MAX,
        ..MockBehavior::default()
    })
    .await
    .unwrap();
    let google = MockProvider::start().await.unwrap();

    let tight_breaker = ultrai_config::AdapterConfig {
        request_timeout_ms: 2_000,
        max_attempts: 1,
        backoff_base_ms: 10,
        backoff_max_ms: 20,
        cb_failure_threshold: 2,
        cb_reset_after_ms: 60_000,
    };
    let config = ConfigBuilder::new()
        .with_provider_adapter(Provider::Openai, &failing.base_url(), tight_breaker)
        .with_provider(Provider::Google, &google.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body("query", &["gpt-4", "gemini-1.5-flash"]);

    // Two runs, one failing openai call each: reaches the threshold
    for _ in 0..2 {
        let (status, json) = post_analyze(&server, &body).await;
        assert_eq!(status, 200);
        let failed = json["results"]["initial_response"]["failed_models"]
            .as_array()
            .unwrap();
        assert_eq!(failed[0]["model"], "gpt-4");
    }
    assert_eq!(failing.hits(), 2);

    // Circuit is open: the next run sheds the call without contacting openai
    let (status, json) = post_analyze(&server, &body).await;
    assert_eq!(status, 200);
    let failed = json["results"]["initial_response"]["failed_models"]
        .as_array()
        .unwrap();
    assert_eq!(failed[0]["kind"], "circuit_open");
    assert_eq!(failing.hits(), 2);
}

/// Identical requests are served from the result cache
#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let openai = MockProvider::start().await.unwrap();
    let google = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider(Provider::Openai, &openai.base_url())
        .with_provider(Provider::Google, &google.base_url())
        .with_cache()
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = analyze_body("cached query", &["gpt-4", "gemini-1.5-flash"]);
    let (status, _) = post_analyze(&server, &body).await;
    assert_eq!(status, 200);
    let hits_after_first = openai.hits() + google.hits();

    let (status, json) = post_analyze(&server, &body).await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(openai.hits() + google.hits(), hits_after_first);
}
