//! Completion driver: runs a request in direct or agent mode and exposes the
//! result as an ordered stream of tokens followed by one finish record.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chatflow_traits::ToolRegistry;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::agent::{AgentConfig, AgentExecutor, AgentRequest, ChannelEmitter};
use crate::error::{AiError, Result};
use crate::llm::{
    CompletionRequest, FinishReason as ProviderFinishReason, LlmClient, Role, TokenUsage,
};
use crate::memory::{DEFAULT_SESSION_ID, SessionMemoryStore};
use crate::message::ChatInput;

const TOKEN_CHANNEL_CAPACITY: usize = 256;

/// How requests reach the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// One blocking call with the full message list. Stateless.
    Direct,
    /// Tool-calling loop over session memory, streamed.
    #[default]
    Agent,
}

impl FromStr for DriverMode {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(DriverMode::Direct),
            "agent" => Ok(DriverMode::Agent),
            other => Err(AiError::Validation(format!("Unknown driver mode: {other}"))),
        }
    }
}

impl fmt::Display for DriverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverMode::Direct => "direct",
            DriverMode::Agent => "agent",
        })
    }
}

/// Why generation stopped, as reported in the end record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

impl From<ProviderFinishReason> for FinishReason {
    fn from(reason: ProviderFinishReason) -> Self {
        match reason {
            ProviderFinishReason::Stop => FinishReason::Stop,
            ProviderFinishReason::MaxTokens => FinishReason::Length,
            ProviderFinishReason::ContentFilter => FinishReason::ContentFilter,
            ProviderFinishReason::ToolCalls => FinishReason::ToolCalls,
            ProviderFinishReason::Error => FinishReason::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl From<TokenUsage> for Usage {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

/// Terminal record of a generation. Produced exactly once, after the last token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub is_continued: bool,
}

impl CompletionResult {
    pub fn new(finish_reason: FinishReason, usage: impl Into<Usage>) -> Self {
        Self {
            finish_reason,
            usage: usage.into(),
            is_continued: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    Token(String),
    Finish(CompletionResult),
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// Result of a direct-mode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectReply {
    pub text: String,
    pub result: CompletionResult,
}

/// Aborts the generation task if the consuming stream is dropped first.
struct AbortOnDrop<T> {
    handle: JoinHandle<T>,
}

impl<T> AbortOnDrop<T> {
    fn new(handle: JoinHandle<T>) -> Self {
        Self { handle }
    }

    /// Wait for the task. The guard stays armed while waiting.
    async fn join(&mut self) -> std::result::Result<T, JoinError> {
        (&mut self.handle).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        // No-op once the task has finished.
        self.handle.abort();
    }
}

#[derive(Clone)]
pub struct CompletionDriver {
    agent_llm: Arc<dyn LlmClient>,
    direct_llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    memory: SessionMemoryStore,
    agent_config: AgentConfig,
    mode: DriverMode,
    temperature: Option<f32>,
}

impl CompletionDriver {
    /// Driver in agent mode using `llm` for both modes.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        memory: SessionMemoryStore,
    ) -> Self {
        Self {
            direct_llm: llm.clone(),
            agent_llm: llm,
            tools,
            memory,
            agent_config: AgentConfig::default(),
            mode: DriverMode::default(),
            temperature: Some(0.0),
        }
    }

    pub fn with_direct_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.direct_llm = llm;
        self
    }

    pub fn with_agent_config(mut self, config: AgentConfig) -> Self {
        self.temperature = config.temperature;
        self.agent_config = config;
        self
    }

    pub fn with_mode(mut self, mode: DriverMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> DriverMode {
        self.mode
    }

    pub fn memory(&self) -> &SessionMemoryStore {
        &self.memory
    }

    /// Send every message to the direct model in one call.
    pub async fn complete_direct(&self, input: &ChatInput) -> Result<DirectReply> {
        let mut request = CompletionRequest::new(input.messages().to_vec());
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.direct_llm.complete(request).await?;
        tracing::debug!(
            model = self.direct_llm.model(),
            finish_reason = ?response.finish_reason,
            "Direct completion finished"
        );

        Ok(DirectReply {
            text: response.content.unwrap_or_default(),
            result: CompletionResult::new(
                response.finish_reason.into(),
                response.usage.unwrap_or_default(),
            ),
        })
    }

    /// Stream a reply using the configured mode.
    pub fn stream(&self, input: ChatInput, session_id: Option<String>) -> GenerationStream {
        match self.mode {
            DriverMode::Agent => self.stream_agent(input, session_id),
            DriverMode::Direct => self.stream_direct(input),
        }
    }

    /// Direct mode has no incremental output: the reply is one token.
    fn stream_direct(&self, input: ChatInput) -> GenerationStream {
        let driver = self.clone();
        Box::pin(async_stream::try_stream! {
            let reply = driver.complete_direct(&input).await?;
            if !reply.text.is_empty() {
                yield GenerationEvent::Token(reply.text);
            }
            yield GenerationEvent::Finish(reply.result);
        })
    }

    /// Run the agent loop in a background task and relay its tokens.
    ///
    /// The finish record is yielded only after the task has been joined.
    /// Dropping the returned stream aborts the task.
    pub fn stream_agent(&self, input: ChatInput, session_id: Option<String>) -> GenerationStream {
        let (tx, mut rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
        let driver = self.clone();
        let mut task = AbortOnDrop::new(tokio::spawn(async move {
            driver.run_generation(input, session_id, tx).await
        }));

        Box::pin(async_stream::stream! {
            while let Some(token) = rx.recv().await {
                yield Ok(GenerationEvent::Token(token));
            }

            match task.join().await {
                Ok(Ok(result)) => yield Ok(GenerationEvent::Finish(result)),
                Ok(Err(err)) => yield Err(err),
                Err(err) => yield Err(AiError::Agent(format!("generation task failed: {err}"))),
            }
        })
    }

    async fn run_generation(
        self,
        input: ChatInput,
        session_id: Option<String>,
        tx: mpsc::Sender<String>,
    ) -> Result<CompletionResult> {
        let session_id = session_id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        let memory = self.memory.session(&session_id);

        let history = {
            let mut memory = memory.lock().await;
            if memory.is_empty() && !input.history().is_empty() {
                let seed = input
                    .history()
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .cloned();
                if let Err(err) = memory.extend(seed).await {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %err,
                        "Failed to compact seeded history"
                    );
                }
            }
            memory.get_context()
        };

        let executor = AgentExecutor::new(self.agent_llm.clone(), self.tools.clone())
            .with_config(self.agent_config.clone());
        let request = AgentRequest::new(input.active_input()).with_history(history);
        let mut emitter = ChannelEmitter::new(tx);

        let outcome = executor.execute(request, &mut emitter).await?;

        if let Err(err) = memory
            .lock()
            .await
            .append_turn(input.active_input(), outcome.reply.as_str())
            .await
        {
            tracing::warn!(
                session_id = %session_id,
                error = %err,
                "Failed to compact conversation memory"
            );
        }

        Ok(CompletionResult::new(outcome.finish_reason, outcome.usage))
    }
}
