//! Registry behavior against a live mock endpoint, plus environment
//! auto-discovery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hivemind_providers::{
    descriptor, discover_from_env, AdapterConfig, CompletionRequest, HealthState, HttpAdapter,
    ProviderRecord, ProviderRegistry, RetryConfig,
};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

async fn mock_openai_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-reg",
            "choices": [{
                "message": {"content": "registry answer"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 2, "completion_tokens": 2},
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn registry_dispatches_through_a_registered_adapter() {
    let server = MockServer::start().await;
    mock_openai_endpoint(&server).await;

    let registry = ProviderRegistry::new();
    let adapter = HttpAdapter::from_descriptor(
        descriptor("openai").unwrap(),
        AdapterConfig::api_key("sk-test")
            .with_base_url(server.uri())
            .with_retry(fast_retry()),
    )
    .unwrap();
    registry.register(Arc::new(adapter)).await.unwrap();

    let request = CompletionRequest::new().with_user_message("hello");
    let response = registry.complete_with("openai", request, None).await.unwrap();

    assert_eq!(response.provider, "openai");
    assert_eq!(response.content, "registry answer");

    let state = registry.get("openai").await.unwrap();
    assert_eq!(state.health(), HealthState::Healthy);
    assert_eq!(registry.metrics("openai").unwrap().successful_requests, 1);
}

#[tokio::test]
async fn register_from_record_builds_a_catalog_adapter() {
    let server = MockServer::start().await;
    mock_openai_endpoint(&server).await;

    let registry = ProviderRegistry::new();
    registry
        .register_from_record(ProviderRecord {
            provider_type: "groq".to_string(),
            name: Some("groq-primary".to_string()),
            api_key: "gsk-test".to_string(),
            base_url: Some(server.uri()),
            default_model: Some("llama-3.3-70b-versatile".to_string()),
            max_concurrent_requests: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    let request = CompletionRequest::new().with_user_message("hello");
    let response = registry
        .complete_with("groq-primary", request, None)
        .await
        .unwrap();
    assert_eq!(response.provider, "groq-primary");

    let state = registry.get("groq-primary").await.unwrap();
    assert_eq!(state.limiter_stats().capacity, 2);

    let unknown = registry
        .register_from_record(ProviderRecord {
            provider_type: "not-a-provider".to_string(),
            ..Default::default()
        })
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn rate_limited_endpoint_marks_health() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let registry = ProviderRegistry::new();
    let adapter = HttpAdapter::from_descriptor(
        descriptor("openai").unwrap(),
        AdapterConfig::api_key("sk-test")
            .with_base_url(server.uri())
            .with_retry(RetryConfig {
                max_retries: 1,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
            }),
    )
    .unwrap();
    registry.register(Arc::new(adapter)).await.unwrap();

    let request = CompletionRequest::new().with_user_message("hello");
    let result = registry.complete_with("openai", request, None).await;
    assert!(result.is_err());

    let state = registry.get("openai").await.unwrap();
    assert_eq!(state.health(), HealthState::RateLimited);
}

#[tokio::test]
async fn discovery_registers_only_configured_providers() {
    // Distinct vars chosen to avoid colliding with a developer's real
    // environment; cleaned up at the end.
    std::env::set_var("MOONSHOT_API_KEY", "mk-test");
    std::env::set_var("CEREBRAS_API_KEY", "ck-test");
    std::env::set_var("CEREBRAS_BASE_URL", "http://localhost:9999/v1");
    std::env::set_var("OLLAMA_BASE_URL", "http://localhost:11434/v1");

    let registry = ProviderRegistry::new();
    let report = discover_from_env(&registry, None).await;

    std::env::remove_var("MOONSHOT_API_KEY");
    std::env::remove_var("CEREBRAS_API_KEY");
    std::env::remove_var("CEREBRAS_BASE_URL");
    std::env::remove_var("OLLAMA_BASE_URL");

    for expected in ["moonshot", "cerebras", "ollama"] {
        assert!(
            report.registered.contains(&expected.to_string()),
            "{expected} missing from {:?}",
            report.registered
        );
        assert!(registry.get(expected).await.is_some());
    }
    // Nothing configured nothing registered.
    assert!(report.skipped.contains(&"minimax".to_string()));
    assert!(registry.get("minimax").await.is_none());

    // Re-discovery with the vars gone registers nothing new.
    let second = discover_from_env(&registry, None).await;
    assert!(second.registered.is_empty());
}
