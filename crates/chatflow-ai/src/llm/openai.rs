//! OpenAI-compatible chat completions provider

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};
use crate::llm::retry::{LlmRetryConfig, send_with_retry};

const PROVIDER: &str = "OpenAI";

/// OpenAI client
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_config: LlmRetryConfig,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            retry_config: LlmRetryConfig::default(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_config(mut self, config: LlmRetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function",
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        OpenAIRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            tools,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then_some(OpenAIStreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, body: &OpenAIRequest) -> Result<reqwest::Response> {
        send_with_retry(&self.retry_config, PROVIDER, || {
            self.client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(body)
        })
        .await
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAIStreamOptions>,
}

#[derive(Serialize)]
struct OpenAIStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIMessageToolCall>>,
}

impl From<&Message> for OpenAIMessage {
    fn from(m: &Message) -> Self {
        let tool_calls = m.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|tc| OpenAIMessageToolCall {
                    id: tc.id.clone(),
                    r#type: "function",
                    function: OpenAIMessageFunction {
                        name: tc.name.clone(),
                        arguments: match &tc.arguments {
                            // Unparseable arguments are kept verbatim.
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        },
                    },
                })
                .collect()
        });

        // Assistant messages carrying tool calls may have null content
        let content = if m.tool_calls.is_some() && m.content.is_empty() {
            None
        } else {
            Some(m.content.clone())
        };

        Self {
            role: m.role.as_str(),
            content,
            tool_call_id: m.tool_call_id.clone(),
            tool_calls,
        }
    }
}

#[derive(Serialize)]
struct OpenAIMessageToolCall {
    id: String,
    r#type: &'static str,
    function: OpenAIMessageFunction,
}

#[derive(Serialize)]
struct OpenAIMessageFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAITool {
    r#type: &'static str,
    function: OpenAIFunction,
}

#[derive(Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAIUsage> for TokenUsage {
    fn from(u: OpenAIUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// Streaming types

#[derive(Deserialize, Debug)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct OpenAIStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIStreamToolCall>>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<OpenAIStreamFunction>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// Incremental decoder for the `text/event-stream` body of a streaming completion.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network chunks are decoded intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    tool_call_ids: HashMap<usize, String>,
    tool_call_names: HashMap<usize, String>,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk>> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim_end_matches(['\r', '\n']), &mut chunks);
        }
        chunks
    }

    /// Flush a trailing event that arrived without a final newline.
    pub(crate) fn finish(&mut self) -> Vec<Result<StreamChunk>> {
        let rest = std::mem::take(&mut self.buffer);
        let mut chunks = Vec::new();
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim();
        if !line.is_empty() {
            self.decode_line(line, &mut chunks);
        }
        chunks
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<Result<StreamChunk>>) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.done = true;
            return;
        }

        let parsed: OpenAIStreamResponse = match serde_json::from_str(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed stream event");
                return;
            }
        };

        if let Some(error) = parsed.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            out.push(Err(AiError::Llm(message)));
            return;
        }

        for choice in parsed.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                out.push(Ok(StreamChunk::text(content)));
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                if let Some(id) = &tc.id {
                    self.tool_call_ids.insert(tc.index, id.clone());
                }
                if let Some(name) = tc.function.as_ref().and_then(|f| f.name.as_ref()) {
                    self.tool_call_names.insert(tc.index, name.clone());
                }

                out.push(Ok(StreamChunk::tool_call(ToolCallDelta {
                    index: tc.index,
                    id: self.tool_call_ids.get(&tc.index).cloned(),
                    name: self.tool_call_names.get(&tc.index).cloned(),
                    arguments: tc.function.and_then(|f| f.arguments),
                })));
            }

            if let Some(reason) = choice.finish_reason {
                out.push(Ok(StreamChunk::final_chunk(
                    FinishReason::from_provider(&reason),
                    None,
                )));
            }
        }

        // Sent as a separate trailing event when include_usage is set
        if let Some(usage) = parsed.usage {
            out.push(Ok(StreamChunk::usage(usage.into())));
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_body(&request, false);
        let data: OpenAIResponse = self.send(&body).await?.json().await?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("No response from OpenAI".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Stop),
            usage: data.usage.map(Into::into),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.clone();

        Box::pin(async_stream::stream! {
            let body = client.build_body(&request, true);
            let response = match client.send(&body).await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        yield Err(AiError::Http(err));
                        return;
                    }
                };

                for chunk in decoder.push(&bytes) {
                    let failed = chunk.is_err();
                    yield chunk;
                    if failed {
                        return;
                    }
                }

                if decoder.is_done() {
                    return;
                }
            }

            for chunk in decoder.finish() {
                yield chunk;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Role;

    #[test]
    fn decoder_emits_text_finish_and_usage() {
        let mut decoder = SseDecoder::default();
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );

        let chunks: Vec<StreamChunk> = decoder
            .push(body.as_bytes())
            .into_iter()
            .map(|c| c.unwrap())
            .collect();

        assert_eq!(chunks[0].text, "Hel");
        assert_eq!(chunks[1].text, "lo");
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::Stop));
        assert_eq!(chunks[3].usage.map(|u| u.total_tokens), Some(5));
        assert!(decoder.is_done());
    }

    #[test]
    fn decoder_handles_split_multibyte_characters() {
        let mut decoder = SseDecoder::default();
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n";
        let bytes = event.as_bytes();
        let split = event.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        let chunks = decoder.push(&bytes[split..]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().text, "héllo");
    }

    #[test]
    fn decoder_tracks_tool_call_ids_across_deltas() {
        let mut decoder = SseDecoder::default();
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"add_numbers\",\"arguments\":\"{\\\"i\\\":\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"2}\"}}]}}]}\n",
        );

        let chunks: Vec<StreamChunk> = decoder
            .push(body.as_bytes())
            .into_iter()
            .map(|c| c.unwrap())
            .collect();

        let second = chunks[1].tool_call_delta.as_ref().unwrap();
        assert_eq!(second.id.as_deref(), Some("call_1"));
        assert_eq!(second.name.as_deref(), Some("add_numbers"));
        assert_eq!(second.arguments.as_deref(), Some("2}"));
    }

    #[test]
    fn decoder_surfaces_inline_errors() {
        let mut decoder = SseDecoder::default();
        let chunks = decoder.push(b"data: {\"error\":{\"message\":\"quota exceeded\"}}\n");
        assert!(matches!(&chunks[0], Err(AiError::Llm(msg)) if msg == "quota exceeded"));
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        assert!(
            decoder
                .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}")
                .is_empty()
        );
        let chunks = decoder.finish();
        assert_eq!(chunks[0].as_ref().unwrap().text, "tail");
    }

    #[test]
    fn request_body_serializes_tool_history() {
        let client = OpenAIClient::new("key").with_model("gpt-test");
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "add_numbers".to_string(),
            arguments: serde_json::json!({"i": 2, "j": 3}),
        };
        let request = CompletionRequest::new(vec![
            Message::user("add"),
            Message::assistant_with_tool_calls(None, vec![call]),
            Message::tool_result("call_1", "5"),
        ]);

        let body = serde_json::to_value(client.build_body(&request, true)).unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body["messages"][1]["content"].is_null());
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"i\":2,\"j\":3}"
        );
        assert_eq!(body["messages"][2]["role"], Role::Tool.as_str());
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
    }
}
