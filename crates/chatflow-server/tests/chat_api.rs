//! In-process HTTP tests of the chat routes

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chatflow_ai::llm::{MockLlmClient, MockStep};
use chatflow_ai::{
    CompletionDriver, DriverMode, MemoryConfig, SessionMemoryStore, default_registry,
};
use chatflow_server::{AppState, build_router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn driver(agent: &MockLlmClient) -> CompletionDriver {
    let memory = SessionMemoryStore::new(
        Arc::new(MockLlmClient::new("summary")),
        MemoryConfig::default(),
    );
    CompletionDriver::new(Arc::new(agent.clone()), Arc::new(default_registry()), memory)
}

fn app(driver: CompletionDriver) -> Router {
    build_router(AppState::new(driver), &["*".to_string()])
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn streams_data_protocol_with_headers() {
    let client = MockLlmClient::from_steps(
        "agent",
        vec![
            MockStep::tool_call("call_1", "add_numbers", json!({"i": 2, "j": 2})),
            MockStep::text("It is 4"),
        ],
    );

    let response = app(driver(&client))
        .oneshot(post(
            "/chat-stream",
            json!({"messages": [{"role": "user", "content": "What is 2+2?"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-stream-protocol"], "v1");
    assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = body_text(response).await;
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[..3], ["0:\"It \"", "0:\"is \"", "0:\"4\""]);
    assert_eq!(lines.len(), 4);
    let end: Value = serde_json::from_str(lines[3].strip_prefix("e:").unwrap()).unwrap();
    assert_eq!(end["finishReason"], "stop");
    assert_eq!(end["isContinued"], false);
}

#[tokio::test]
async fn api_chat_alias_streams_text_protocol() {
    let client = MockLlmClient::from_steps("agent", vec![MockStep::text("plain reply")]);

    let response = app(driver(&client))
        .oneshot(post(
            "/api/chat?protocol=text",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-vercel-ai-data-stream").is_none());
    assert_eq!(body_text(response).await, "plain reply");
}

#[tokio::test]
async fn empty_messages_is_bad_request() {
    let client = MockLlmClient::new("agent");

    let response = app(driver(&client))
        .oneshot(post("/chat-stream", json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["message"], "Validation error: No messages provided");
    assert!(client.requests().await.is_empty());
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let client = MockLlmClient::new("agent");
    let request = Request::builder()
        .method("POST")
        .uri("/chat-stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app(driver(&client)).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_protocol_is_bad_request() {
    let client = MockLlmClient::new("agent");

    let response = app(driver(&client))
        .oneshot(post(
            "/chat-stream?protocol=xml",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_failure_before_tokens_is_server_error() {
    let client = MockLlmClient::from_steps("agent", vec![MockStep::error("invalid api key")]);

    let response = app(driver(&client))
        .oneshot(post(
            "/chat-stream",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["code"], 500);
}

#[tokio::test]
async fn upstream_failure_mid_stream_truncates_body() {
    let client = MockLlmClient::from_steps(
        "agent",
        vec![MockStep::partial_then_error("Partial", "connection reset")],
    );

    let response = app(driver(&client))
        .oneshot(post(
            "/chat-stream",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let mut received = String::new();
    let mut failed = false;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    received.push_str(std::str::from_utf8(data).unwrap());
                }
            }
            Err(_) => {
                failed = true;
                break;
            }
        }
    }

    assert!(failed);
    assert_eq!(received, "0:\"Partial\"\n");
}

#[tokio::test]
async fn session_header_selects_memory() {
    let client = MockLlmClient::from_steps(
        "agent",
        vec![MockStep::text("Hello Ada"), MockStep::text("fresh")],
    );
    let app = app(driver(&client));

    let mut first = post(
        "/chat-stream",
        json!({"messages": [{"role": "user", "content": "I am Ada"}]}),
    );
    first
        .headers_mut()
        .insert("x-session-id", "ada".parse().unwrap());
    let _ = body_text(app.clone().oneshot(first).await.unwrap()).await;

    let other = post(
        "/chat-stream",
        json!({"messages": [{"role": "user", "content": "Who am I?"}], "sessionId": "bob"}),
    );
    let _ = body_text(app.oneshot(other).await.unwrap()).await;

    let second = &client.requests().await[1];
    assert!(second.messages.iter().all(|m| m.content != "I am Ada"));
}

#[tokio::test]
async fn direct_chat_returns_reply_string() {
    let agent = MockLlmClient::new("agent");
    let direct = MockLlmClient::from_steps("direct", vec![MockStep::text("Hi there!")]);
    let driver = driver(&agent).with_direct_llm(Arc::new(direct.clone()));

    let response = app(driver)
        .oneshot(post(
            "/chat",
            json!({"messages": [
                {"role": "system", "content": "Be nice"},
                {"role": "user", "content": "Hello"}
            ]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!("Hi there!"));
    assert_eq!(direct.requests().await[0].messages.len(), 2);
}

#[tokio::test]
async fn direct_mode_serves_stream_route() {
    let client = MockLlmClient::from_steps("agent", vec![MockStep::text("one shot")]);
    let driver = driver(&client).with_mode(DriverMode::Direct);

    let response = app(driver)
        .oneshot(post(
            "/chat-stream",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    let body = body_text(response).await;
    assert!(body.starts_with("0:\"one shot\"\n"));
}

#[tokio::test]
async fn health_routes() {
    let client = MockLlmClient::new("agent");
    let app = app(driver(&client));

    for uri in ["/health", "/hi"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
