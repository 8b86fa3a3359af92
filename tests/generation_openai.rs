mod common;

use std::time::Duration;

use common::ScriptedGenerator;
use legiscore::generation::{
    GenerationError, GenerationRequest, Generator, OpenAiGenerator, ThrottleConfig,
    ThrottledGenerator,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn generator(server: &MockServer) -> OpenAiGenerator {
    OpenAiGenerator::with_config("sk-test", server.uri(), Duration::from_secs(5), "gpt-test")
        .unwrap()
}

fn request() -> GenerationRequest {
    GenerationRequest::new("system prompt", "bill text", 256)
}

#[tokio::test]
async fn openai_returns_message_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "temperature": 0.0,
            "max_tokens": 256,
            "messages": [
                { "role": "system", "content": "system prompt" },
                { "role": "user", "content": "bill text" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "Stats:\nHousing: +5" },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = generator(&server).generate(&request()).await.unwrap();
    assert_eq!(text, "Stats:\nHousing: +5");
}

#[tokio::test]
async fn openai_maps_status_codes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "message": "overloaded" }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "context too long" }
        })))
        .mount(&server)
        .await;

    let gen = generator(&server);

    let err = gen.generate(&request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::RateLimited { .. }));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

    let err = gen.generate(&request()).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("overloaded"));

    let err = gen.generate(&request()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("context too long"));
}

#[tokio::test]
async fn openai_surfaces_refusals() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": null, "refusal": "I can't help with that." },
                "finish_reason": "stop"
            }]
        })))
        .mount(&server)
        .await;

    let err = generator(&server).generate(&request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Refused { .. }));
    assert_eq!(err.code(), "refused");
}

fn throttle() -> ThrottleConfig {
    ThrottleConfig {
        wait_between_calls: Duration::from_secs(60),
        reference_length: 3_500_000,
        padding: Duration::from_secs(2),
        max_retries: 2,
        retry_base_delay: Duration::from_secs(1),
    }
}

#[tokio::test(start_paused = true)]
async fn throttled_generator_paces_calls_by_payload() {
    let inner = ScriptedGenerator::repeating("ok");
    let gen = ThrottledGenerator::new(inner, throttle());

    let start = tokio::time::Instant::now();
    gen.generate(&GenerationRequest::new("", "x".repeat(490_000), 10))
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    gen.generate(&request()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn throttled_generator_retries_transient_errors() {
    let inner = ScriptedGenerator::new(vec![
        Err(GenerationError::rate_limited(Duration::from_secs(5))),
        Ok("done".to_string()),
    ]);
    let gen = ThrottledGenerator::new(inner, throttle());

    let start = tokio::time::Instant::now();
    let text = gen.generate(&request()).await.unwrap();
    assert_eq!(text, "done");
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn throttled_generator_does_not_retry_permanent_errors() {
    let inner = ScriptedGenerator::new(vec![
        Err(GenerationError::invalid_request("bad")),
        Ok("never".to_string()),
    ]);
    let gen = ThrottledGenerator::new(inner, throttle());
    let err = gen.generate(&request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::InvalidRequest { .. }));
}
