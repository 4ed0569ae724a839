//! OpenAI client tests against a local fake of the chat completions API

use chatflow_ai::llm::{
    CompletionRequest, FinishReason, LlmClient, LlmRetryConfig, Message, OpenAIClient,
};
use chatflow_ai::{AiError, ErrorKind};
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn disable_system_proxy_for_tests() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        // Safety: set once for the process before any HTTP clients are built.
        unsafe {
            std::env::set_var("CHATFLOW_DISABLE_SYSTEM_PROXY", "1");
        }
    });
}

fn fast_retries() -> LlmRetryConfig {
    LlmRetryConfig {
        max_retries: 2,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

async fn client(server: &MockServer) -> OpenAIClient {
    disable_system_proxy_for_tests();
    OpenAIClient::new("test-key")
        .with_model("gpt-test")
        .with_base_url(server.uri())
        .with_retry_config(fast_retries())
}

fn sse(events: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn streams_text_finish_and_usage() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}, "finish_reason": null}]}),
        json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": null}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let chunks = client(&server)
        .await
        .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(text, "Hello");
    assert!(
        chunks
            .iter()
            .any(|c| c.finish_reason == Some(FinishReason::Stop))
    );
    let usage = chunks.iter().find_map(|c| c.usage).unwrap();
    assert_eq!(usage.prompt_tokens, 7);
    assert_eq!(usage.completion_tokens, 2);
}

#[tokio::test]
async fn streams_tool_call_fragments() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "add_numbers", "arguments": ""}}]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"i\":2,"}}]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"j\":2}"}}]}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let chunks = client(&server)
        .await
        .complete_stream(CompletionRequest::new(vec![Message::user("2+2")]))
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    let arguments: String = chunks
        .iter()
        .filter_map(|c| c.tool_call_delta.as_ref())
        .filter_map(|d| d.arguments.clone())
        .collect();
    assert_eq!(arguments, "{\"i\":2,\"j\":2}");
    assert!(
        chunks
            .iter()
            .filter_map(|c| c.tool_call_delta.as_ref())
            .all(|d| d.name.as_deref() == Some("add_numbers"))
    );
    assert_eq!(
        chunks.last().and_then(|c| c.finish_reason),
        Some(FinishReason::ToolCalls)
    );
}

#[tokio::test]
async fn retries_transient_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "recovered"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .await
        .complete(CompletionRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();

    assert_eq!(response.content.as_deref(), Some("recovered"));
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::LlmHttp { status: 401, .. }));
    assert_eq!(err.kind(), ErrorKind::Upstream);
}

#[tokio::test]
async fn retry_after_header_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .complete(CompletionRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(3));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn long_retry_after_is_capped_by_max_delay() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3600"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "after wait"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let response = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.complete(CompletionRequest::new(vec![Message::user("hi")])),
    )
    .await
    .expect("retry should not wait for the full Retry-After")
    .unwrap();

    assert_eq!(response.content.as_deref(), Some("after wait"));
}
