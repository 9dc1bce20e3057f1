use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use triage_harness::gateway::{
    CallError, ClassifierGateway, CompletionProvider, CompletionRequest, FinishReason,
    HttpChatAdapter, NoopUsageSink, ProviderKind, ProviderSlot, RetryPolicy,
};
use triage_harness::taxonomy::{CategoryCode, Outcome, Sentinel};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> HttpChatAdapter {
    HttpChatAdapter::with_config("hf-test", server.uri(), Duration::from_secs(5)).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest::new("Qwen/Qwen2.5-Coder-32B-Instruct", "classify this").max_tokens(150)
}

#[tokio::test]
async fn http_chat_parses_success_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer hf-test"))
        .and(body_partial_json(json!({
            "model": "Qwen/Qwen2.5-Coder-32B-Instruct",
            "max_tokens": 150,
            "messages": [{ "role": "user", "content": "classify this" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "LOOP_COND" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 412, "completion_tokens": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = adapter(&server).complete(&request()).await.unwrap();
    assert_eq!(resp.content, "LOOP_COND");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 412);
    assert_eq!(resp.output_tokens, 3);
}

#[tokio::test]
async fn http_chat_missing_content_is_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": {}, "finish_reason": "length" }]
        })))
        .mount(&server)
        .await;

    let err = adapter(&server).complete(&request()).await.unwrap_err();
    assert!(matches!(err, CallError::Provider { .. }), "{err:?}");
}

#[tokio::test]
async fn http_chat_empty_content_is_returned_as_is() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "" }, "finish_reason": "length" }]
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server).complete(&request()).await.unwrap();
    assert_eq!(resp.content, "");
    assert_eq!(resp.finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn http_chat_classifies_429_as_rate_limited_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({
                    "error": { "message": "too many requests", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).complete(&request()).await.unwrap_err();
    match err {
        CallError::RateLimited { context } => {
            let ctx = context.expect("context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.request_id.as_deref(), Some("req-42"));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn http_chat_classifies_503_400_and_500() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "cold" })))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "error": "Model is loading" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "missing" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "model not supported by any provider" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "broken" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let adapter = adapter(&server);

    let err = adapter
        .complete(&CompletionRequest::new("cold", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ModelLoading { .. }), "{err:?}");

    let err = adapter
        .complete(&CompletionRequest::new("missing", "x"))
        .await
        .unwrap_err();
    match err {
        CallError::ModelUnavailable { message, .. } => {
            assert!(message.contains("not supported"));
        }
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }

    let err = adapter
        .complete(&CompletionRequest::new("broken", "x"))
        .await
        .unwrap_err();
    match err {
        CallError::Provider { message, context, .. } => {
            assert_eq!(message, "HTTP 500");
            assert_eq!(context.and_then(|c| c.http_status), Some(500));
        }
        other => panic!("expected Provider, got {other:?}"),
    }
}

#[tokio::test]
async fn http_chat_timeout_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({
                    "choices": [{ "message": { "content": "LOOP_COND" } }]
                })),
        )
        .mount(&server)
        .await;

    let adapter =
        HttpChatAdapter::with_config("hf-test", server.uri(), Duration::from_millis(50)).unwrap();
    let err = adapter.complete(&request()).await.unwrap_err();
    assert!(matches!(err, CallError::Transient { .. }), "{err:?}");
}

/// First `failures` requests get 429, the rest succeed.
struct FlipAfter {
    failures: usize,
    seen: Arc<AtomicUsize>,
}

impl Respond for FlipAfter {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(429).set_body_json(json!({ "error": "slow down" }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "content": "Classification: IO_FORMAT" },
                    "finish_reason": "stop"
                }]
            }))
        }
    }
}

fn gateway_for(server: &MockServer, policy: RetryPolicy) -> ClassifierGateway {
    let slot = ProviderSlot::new(
        "qwen",
        ProviderKind::HttpChat,
        "Qwen/Qwen2.5-Coder-32B-Instruct",
        Arc::new(adapter(server)),
    )
    .retry(policy);
    ClassifierGateway::new(Arc::new(NoopUsageSink))
        .with_provider(slot)
        .unwrap()
}

#[tokio::test]
async fn gateway_retries_rate_limits_until_success() {
    let server = MockServer::start().await;
    let seen = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipAfter {
            failures: 2,
            seen: seen.clone(),
        })
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, RetryPolicy::immediate(3));
    let inv = gateway.invoke("qwen", "prompt").await;

    assert_eq!(inv.outcome, Outcome::Category(CategoryCode::IoFormat));
    assert_eq!(inv.attempts, 3);
    assert_eq!(inv.retries(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gateway_gives_up_after_persistent_rate_limits() {
    let server = MockServer::start().await;
    let seen = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipAfter {
            failures: usize::MAX,
            seen: seen.clone(),
        })
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, RetryPolicy::immediate(3));
    let inv = gateway.invoke("qwen", "prompt").await;

    assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::RateLimited));
    assert_eq!(inv.last_error, Some("rate_limited"));
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gateway_records_model_not_available_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "bad model" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, RetryPolicy::immediate(3));
    let inv = gateway.invoke("qwen", "prompt").await;
    assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::ModelNotAvailable));
    assert_eq!(inv.attempts, 1);
}
