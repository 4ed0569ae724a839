//! Tool-calling agent loop
//!
//! Each iteration streams one completion. Text fragments are forwarded to the
//! emitter as soon as they arrive. If the model asked for tools, the calls are
//! run concurrently, their observations are appended to the scratchpad and
//! the loop continues; otherwise the execution is complete.
//!
//! Tool failures never abort the loop. Unknown tools, malformed arguments,
//! timeouts and tool errors all become observations the model can react to.
//! Provider errors abort the execution.

use std::sync::Arc;
use std::time::Duration;

use chatflow_traits::{ToolError, ToolRegistry};
use futures::StreamExt;
use futures::future::join_all;
use serde_json::Value;

use crate::agent::prompt::build_messages;
use crate::agent::state::AgentState;
use crate::agent::stream::{StreamEmitter, ToolCallAccumulator};
use crate::driver::FinishReason;
use crate::error::Result;
use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason as ProviderFinishReason, LlmClient,
    Message, TokenUsage, ToolCall,
};

pub const DEFAULT_AGENT_PROMPT: &str = "You're a helpful agent";
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_TOOL_RESULT_LENGTH: usize = 4_000;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub max_iterations: usize,
    pub temperature: Option<f32>,
    pub tool_timeout: Duration,
    /// Observations longer than this many characters are truncated.
    pub max_tool_result_length: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_AGENT_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: Some(0.0),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_tool_result_length: DEFAULT_MAX_TOOL_RESULT_LENGTH,
        }
    }
}

impl AgentConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}

/// Input of one agent execution.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub input: String,
    /// Prior context, oldest first. Usually the memory's `get_context()`.
    pub history: Vec<Message>,
}

impl AgentRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    /// Concatenation of every text fragment emitted during the execution.
    pub reply: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub iterations: usize,
}

pub struct AgentExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl AgentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        request: AgentRequest,
        emitter: &mut dyn StreamEmitter,
    ) -> Result<AgentOutcome> {
        let mut state = AgentState::new(
            uuid::Uuid::new_v4().to_string(),
            self.config.max_iterations,
        );
        let schemas = self.tools.schemas();
        let mut finish_reason = FinishReason::Length;

        tracing::debug!(
            execution_id = %state.execution_id,
            model = self.llm.model(),
            history = request.history.len(),
            tools = schemas.len(),
            "Starting agent execution"
        );

        while state.is_running() {
            if state.iterations_exhausted() {
                tracing::warn!(
                    execution_id = %state.execution_id,
                    max_iterations = state.max_iterations,
                    "Agent stopped after reaching max iterations"
                );
                state.max_iterations_reached();
                break;
            }
            state.iteration += 1;

            let messages = build_messages(
                &self.config.system_prompt,
                &schemas,
                &request.history,
                &request.input,
                &state.scratchpad,
            );
            let mut completion = CompletionRequest::new(messages).with_tools(schemas.clone());
            if let Some(temperature) = self.config.temperature {
                completion = completion.with_temperature(temperature);
            }

            let response = match self.stream_completion(completion, emitter, &mut state).await {
                Ok(response) => response,
                Err(err) => {
                    state.fail(err.to_string());
                    return Err(err);
                }
            };

            if let Some(usage) = response.usage {
                state.record_usage(usage);
            }

            if response.tool_calls.is_empty() {
                finish_reason = response.finish_reason.into();
                state.complete();
                break;
            }

            tracing::debug!(
                execution_id = %state.execution_id,
                iteration = state.iteration,
                calls = response.tool_calls.len(),
                "Model requested tools"
            );

            let calls = response.tool_calls;
            state.add_message(Message::assistant_with_tool_calls(
                response.content,
                calls.clone(),
            ));
            for (call, observation) in self.execute_tools(&calls, emitter).await {
                state.add_tool_result(call.id.clone(), observation);
            }
        }

        emitter.emit_complete().await;

        tracing::info!(
            execution_id = %state.execution_id,
            iterations = state.iteration,
            finish_reason = ?finish_reason,
            prompt_tokens = state.usage.prompt_tokens,
            completion_tokens = state.usage.completion_tokens,
            "Agent execution finished"
        );

        Ok(AgentOutcome {
            reply: state.reply,
            finish_reason,
            usage: state.usage,
            iterations: state.iteration,
        })
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
        emitter: &mut dyn StreamEmitter,
        state: &mut AgentState,
    ) -> Result<CompletionResponse> {
        if !self.llm.supports_streaming() {
            let response = self.llm.complete(request).await?;
            if let Some(content) = &response.content
                && !content.is_empty()
            {
                state.push_text(content);
                emitter.emit_text_delta(content).await;
            }
            return Ok(response);
        }

        let mut stream = self.llm.complete_stream(request);
        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage = None;
        let mut finish_reason = None;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;

            if !chunk.text.is_empty() {
                text.push_str(&chunk.text);
                state.push_text(&chunk.text);
                emitter.emit_text_delta(&chunk.text).await;
            }

            if let Some(delta) = &chunk.tool_call_delta {
                accumulator.accumulate(delta);
            }

            if let Some(chunk_usage) = chunk.usage {
                usage = Some(chunk_usage);
            }

            if let Some(reason) = chunk.finish_reason {
                finish_reason = Some(reason);
            }
        }

        Ok(CompletionResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: accumulator.finalize(),
            finish_reason: finish_reason.unwrap_or(ProviderFinishReason::Stop),
            usage,
        })
    }

    /// Run every call concurrently. Results keep the order of `calls`.
    async fn execute_tools<'a>(
        &self,
        calls: &'a [ToolCall],
        emitter: &mut dyn StreamEmitter,
    ) -> Vec<(&'a ToolCall, String)> {
        for call in calls {
            emitter
                .emit_tool_call_start(&call.id, &call.name, &call.arguments.to_string())
                .await;
        }

        let observations = join_all(calls.iter().map(|call| self.observe(call))).await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, (observation, success)) in calls.iter().zip(observations) {
            emitter
                .emit_tool_call_result(&call.id, &call.name, &observation, success)
                .await;
            results.push((call, observation));
        }
        results
    }

    async fn observe(&self, call: &ToolCall) -> (String, bool) {
        if let Value::String(raw) = &call.arguments {
            return (
                format!(
                    "Invalid Format: the arguments for `{}` are not valid JSON: {raw}. \
                     Call the tool again with a JSON object matching its schema.",
                    call.name
                ),
                false,
            );
        }

        if !self.tools.has(&call.name) {
            return (
                format!(
                    "{} is not a valid tool, try one of [{}].",
                    call.name,
                    self.tools.names().join(", ")
                ),
                false,
            );
        }

        let invocation = tokio::time::timeout(
            self.config.tool_timeout,
            self.tools.invoke(&call.name, call.arguments.clone()),
        )
        .await
        .unwrap_or_else(|_| Err(ToolError::Timeout(call.name.clone())));

        match invocation {
            Ok(output) => (
                truncate_observation(&output.to_observation(), self.config.max_tool_result_length),
                true,
            ),
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "Tool invocation failed");
                (format!("Error: {err}"), false)
            }
        }
    }
}

fn truncate_observation(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n[truncated, {} characters total]",
            &content[..cut],
            content.chars().count()
        ),
        None => content.to_string(),
    }
}
