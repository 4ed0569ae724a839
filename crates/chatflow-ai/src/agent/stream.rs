use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::llm::{ToolCall, ToolCallDelta};

/// Receives incremental output of an agent execution.
#[async_trait]
pub trait StreamEmitter: Send + Sync {
    async fn emit_text_delta(&mut self, text: &str);
    async fn emit_tool_call_start(&mut self, _id: &str, _name: &str, _arguments: &str) {}
    async fn emit_tool_call_result(&mut self, _id: &str, _name: &str, _result: &str, _success: bool) {
    }
    async fn emit_complete(&mut self) {}
}

pub struct NullEmitter;

#[async_trait]
impl StreamEmitter for NullEmitter {
    async fn emit_text_delta(&mut self, _text: &str) {}
}

/// Forwards text deltas into a channel. Tool events are only logged.
pub struct ChannelEmitter {
    tx: mpsc::Sender<String>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl StreamEmitter for ChannelEmitter {
    async fn emit_text_delta(&mut self, text: &str) {
        if self.tx.send(text.to_string()).await.is_err() {
            tracing::debug!("Token receiver dropped");
        }
    }

    async fn emit_tool_call_start(&mut self, id: &str, name: &str, arguments: &str) {
        tracing::debug!(tool_call_id = id, tool = name, arguments, "Tool call started");
    }

    async fn emit_tool_call_result(&mut self, id: &str, name: &str, result: &str, success: bool) {
        tracing::debug!(
            tool_call_id = id,
            tool = name,
            success,
            result_len = result.len(),
            "Tool call finished"
        );
    }
}

#[derive(Debug, Clone)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments_json: String,
}

/// Reassembles streamed tool-call fragments, keyed by the provider's index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    builders: BTreeMap<usize, ToolCallBuilder>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, delta: &ToolCallDelta) {
        let builder = self
            .builders
            .entry(delta.index)
            .or_insert_with(|| ToolCallBuilder {
                id: String::new(),
                name: String::new(),
                arguments_json: String::new(),
            });

        if let Some(id) = &delta.id
            && builder.id.is_empty()
        {
            builder.id = id.clone();
        }

        if let Some(name) = &delta.name
            && builder.name.is_empty()
        {
            builder.name = name.clone();
        }

        if let Some(args) = &delta.arguments {
            builder.arguments_json.push_str(args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn finalize(self) -> Vec<ToolCall> {
        self.builders
            .into_iter()
            .map(|(index, builder)| ToolCall {
                id: if builder.id.is_empty() {
                    format!("call_{index}")
                } else {
                    builder.id
                },
                name: builder.name,
                arguments: parse_arguments(builder.arguments_json),
            })
            .collect()
    }
}

/// Malformed JSON is kept verbatim as `Value::String` so the loop can send a
/// correction back to the model instead of guessing.
fn parse_arguments(json: String) -> Value {
    if json.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str(&json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                json_len = json.len(),
                error = %e,
                "Failed to parse tool call arguments"
            );
            Value::String(json)
        }
    }
}
