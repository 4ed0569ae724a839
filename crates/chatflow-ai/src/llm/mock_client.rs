//! Scripted LLM client for agent, memory and handler tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, StreamChunk, StreamResult,
    TokenUsage, ToolCall, ToolCallDelta,
};

/// Deterministic step for scripted mock completions.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Return a plain assistant message.
    Text(String),
    /// Return one or more tool calls in a single turn.
    ToolCalls(Vec<ToolCall>),
    /// Fail before producing any output.
    Error(String),
    /// Stream some text, then fail.
    PartialThenError { text: String, message: String },
}

/// Scripted completion step with optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub delay_ms: u64,
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Text(content.into()),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::tool_calls(vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }])
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::ToolCalls(calls),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn partial_then_error(text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::PartialThenError {
                text: text.into(),
                message: message.into(),
            },
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A deterministic mock LLM client driven by scripted steps.
///
/// Once the script is exhausted every call echoes the last user message.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_steps(model, Vec::new())
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining_steps(&self) -> usize {
        self.script.lock().await.len()
    }

    async fn next_step(&self, request: &CompletionRequest) -> Option<MockStep> {
        self.requests.lock().await.push(request.clone());
        let step = self.script.lock().await.pop_front();
        if let Some(step) = &step
            && step.delay_ms > 0
        {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }
        step
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }

    fn fallback_text(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|msg| matches!(msg.role, super::Role::User))
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let kind = match self.next_step(&request).await {
            Some(step) => step.kind,
            None => MockStepKind::Text(Self::fallback_text(&request)),
        };

        match kind {
            MockStepKind::Text(content) => Ok(CompletionResponse {
                usage: Some(Self::usage_for(content.len())),
                content: Some(content),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            }),
            MockStepKind::ToolCalls(tool_calls) => Ok(CompletionResponse {
                usage: Some(Self::usage_for(0)),
                content: None,
                tool_calls,
                finish_reason: FinishReason::ToolCalls,
            }),
            MockStepKind::Error(message) => Err(AiError::Llm(message)),
            MockStepKind::PartialThenError { message, .. } => Err(AiError::Llm(message)),
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.clone();
        Box::pin(try_stream! {
            let kind = match client.next_step(&request).await {
                Some(step) => step.kind,
                None => MockStepKind::Text(Self::fallback_text(&request)),
            };

            match kind {
                MockStepKind::Text(content) => {
                    for word in content.split_inclusive(' ') {
                        yield StreamChunk::text(word);
                    }
                    yield StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(Self::usage_for(content.len())),
                    );
                }
                MockStepKind::ToolCalls(calls) => {
                    for (index, call) in calls.into_iter().enumerate() {
                        yield StreamChunk::tool_call(ToolCallDelta {
                            index,
                            id: Some(call.id),
                            name: Some(call.name),
                            arguments: Some(match call.arguments {
                                serde_json::Value::String(raw) => raw,
                                other => other.to_string(),
                            }),
                        });
                    }
                    yield StreamChunk::final_chunk(FinishReason::ToolCalls, Some(Self::usage_for(0)));
                }
                MockStepKind::Error(message) => {
                    Err::<(), AiError>(AiError::Llm(message))?;
                }
                MockStepKind::PartialThenError { text, message } => {
                    yield StreamChunk::text(text);
                    Err::<(), AiError>(AiError::Llm(message))?;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, TryStreamExt};

    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn mock_client_returns_scripted_text() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("hello")]);

        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .expect("mock response should succeed");

        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(client.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn mock_client_streams_words_then_finish() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("one two three")]);

        let chunks = client
            .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
            .try_collect::<Vec<_>>()
            .await
            .expect("stream should succeed");

        let text: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text[..3], ["one ", "two ", "three"]);
        assert_eq!(
            chunks.last().and_then(|c| c.finish_reason),
            Some(FinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn mock_client_streams_tool_call_deltas() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::tool_call(
                "call-1",
                "add_numbers",
                serde_json::json!({"i": 1, "j": 2}),
            )],
        );

        let chunks = client
            .complete_stream(CompletionRequest::new(vec![Message::user("add")]))
            .try_collect::<Vec<_>>()
            .await
            .expect("stream should succeed");

        let delta = chunks[0].tool_call_delta.as_ref().expect("tool delta");
        assert_eq!(delta.name.as_deref(), Some("add_numbers"));
        assert_eq!(
            chunks.last().and_then(|c| c.finish_reason),
            Some(FinishReason::ToolCalls)
        );
    }

    #[tokio::test]
    async fn mock_client_partial_stream_fails_after_text() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::partial_then_error("par", "boom")],
        );

        let items: Vec<_> = client
            .complete_stream(CompletionRequest::new(vec![Message::user("x")]))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().map(|c| c.text.as_str()).ok(), Some("par"));
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn mock_client_echoes_when_script_is_exhausted() {
        let client = MockLlmClient::new("mock-model");
        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .expect("fallback");
        assert_eq!(response.content.as_deref(), Some("mock-echo: ping"));
    }
}
