//! Conversation memory that keeps recent turns verbatim and folds older turns
//! into a running summary produced by a secondary model.

use std::sync::Arc;

use crate::error::{AiError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message, Role};

pub const SUMMARY_PROMPT: &str = include_str!("templates/summary_prompt.md");

/// Default token budget for the raw buffer.
pub const DEFAULT_MAX_TOKEN_LIMIT: usize = 2_000;
/// Default number of most recent messages that are never summarized.
pub const DEFAULT_MIN_TAIL_MESSAGES: usize = 4;
/// Default number of sessions a store keeps before evicting the least recently used.
pub const DEFAULT_MAX_SESSIONS: usize = 1_024;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Token budget for the raw buffer. Exceeding it triggers summarization.
    pub max_token_limit: usize,
    /// The newest `min_tail_messages` are always kept verbatim.
    pub min_tail_messages: usize,
    /// Cap on the summarizer's output.
    pub max_summary_tokens: u32,
    /// Sessions held by a `SessionMemoryStore` at once.
    pub max_sessions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_token_limit: DEFAULT_MAX_TOKEN_LIMIT,
            min_tail_messages: DEFAULT_MIN_TAIL_MESSAGES,
            max_summary_tokens: 512,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Rough token estimate: four characters per token plus one for framing.
pub fn estimate_tokens(message: &Message) -> usize {
    message.content.chars().count() / 4 + 1
}

pub fn estimate_total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_tokens).sum()
}

/// Summary plus a verbatim buffer of the most recent messages.
///
/// Mutations are committed only once summarization succeeds, so a failed pass
/// leaves the summary and the buffer as they were before the call.
pub struct ConversationMemory {
    config: MemoryConfig,
    summarizer: Arc<dyn LlmClient>,
    summary: Option<String>,
    buffer: Vec<Message>,
}

impl std::fmt::Debug for ConversationMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationMemory")
            .field("config", &self.config)
            .field("summarizer", &self.summarizer.model())
            .field("summary", &self.summary)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

impl ConversationMemory {
    pub fn new(summarizer: Arc<dyn LlmClient>, config: MemoryConfig) -> Self {
        Self {
            config,
            summarizer,
            summary: None,
            buffer: Vec::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Raw messages not yet folded into the summary.
    pub fn buffer(&self) -> &[Message] {
        &self.buffer
    }

    /// Estimated tokens held in the raw buffer.
    pub fn token_count(&self) -> usize {
        estimate_total_tokens(&self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.buffer.is_empty()
    }

    /// Context for the next request: the summary as a system message, then
    /// the raw buffer in order.
    pub fn get_context(&self) -> Vec<Message> {
        let mut context = Vec::with_capacity(self.buffer.len() + 1);
        if let Some(summary) = &self.summary {
            context.push(Message::system(format!(
                "Summary of the earlier conversation:\n{summary}"
            )));
        }
        context.extend(self.buffer.iter().cloned());
        context
    }

    /// Append one message and summarize if the buffer is over budget.
    ///
    /// On `AiError::Summarization` the message is still retained in the raw buffer.
    pub async fn append(&mut self, message: Message) -> Result<()> {
        self.extend(std::iter::once(message)).await
    }

    /// Append a user input and the assistant reply as one unit.
    pub async fn append_turn(
        &mut self,
        input: impl Into<String>,
        reply: impl Into<String>,
    ) -> Result<()> {
        self.extend([Message::user(input), Message::assistant(reply)])
            .await
    }

    pub async fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> Result<()> {
        self.buffer.extend(messages);
        self.prune().await
    }

    /// Fold the oldest messages into the summary until the buffer fits the
    /// budget or only the protected tail remains. Makes at most one
    /// summarizer call.
    async fn prune(&mut self) -> Result<()> {
        let mut tokens = self.token_count();
        if tokens <= self.config.max_token_limit {
            return Ok(());
        }

        let protected = self.config.min_tail_messages.min(self.buffer.len());
        let max_cut = self.buffer.len() - protected;
        let mut cut = 0;
        while cut < max_cut && tokens > self.config.max_token_limit {
            tokens -= estimate_tokens(&self.buffer[cut]);
            cut += 1;
        }

        if cut == 0 {
            tracing::debug!(
                tokens,
                limit = self.config.max_token_limit,
                "Memory over budget but only the protected tail remains"
            );
            return Ok(());
        }

        let summary = self.summarize(&self.buffer[..cut]).await?;

        tracing::debug!(
            summarized = cut,
            retained = self.buffer.len() - cut,
            tokens_after = tokens,
            "Folded conversation into summary"
        );

        self.buffer.drain(..cut);
        self.summary = Some(summary);
        Ok(())
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        let prompt = SUMMARY_PROMPT
            .replace("{summary}", self.summary.as_deref().unwrap_or(""))
            .replace("{new_lines}", &format_lines(messages));

        let request = CompletionRequest::new(vec![Message::user(prompt)])
            .with_temperature(0.0)
            .with_max_tokens(self.config.max_summary_tokens);

        let response = self
            .summarizer
            .complete(request)
            .await
            .map_err(|err| AiError::Summarization(err.to_string()))?;

        let summary = response.content.unwrap_or_default().trim().to_string();
        if summary.is_empty() {
            return Err(AiError::Summarization(
                "summarizer returned an empty summary".to_string(),
            ));
        }
        Ok(summary)
    }
}

fn format_lines(messages: &[Message]) -> String {
    let mut output = String::new();
    for msg in messages {
        let speaker = match msg.role {
            Role::User => "Human",
            Role::Assistant => "AI",
            Role::System => "System",
            Role::Tool => "Tool",
        };
        output.push_str(speaker);
        output.push_str(": ");
        output.push_str(&msg.content);
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockStep};

    fn memory(client: &MockLlmClient, limit: usize, tail: usize) -> ConversationMemory {
        ConversationMemory::new(
            Arc::new(client.clone()),
            MemoryConfig {
                max_token_limit: limit,
                min_tail_messages: tail,
                max_summary_tokens: 128,
                ..MemoryConfig::default()
            },
        )
    }

    // 40 chars -> 11 tokens
    fn long(tag: &str) -> String {
        format!("{tag:-<40}")
    }

    #[tokio::test]
    async fn below_threshold_keeps_context_verbatim() {
        let client = MockLlmClient::new("summary");
        let mut mem = memory(&client, 2_000, 2);

        mem.append_turn("hi", "hello").await.unwrap();
        mem.append(Message::user("how are you")).await.unwrap();

        assert_eq!(
            mem.get_context(),
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("how are you"),
            ]
        );
        assert!(mem.summary().is_none());
        assert!(client.requests().await.is_empty());
    }

    #[tokio::test]
    async fn exceeding_threshold_summarizes_once_and_keeps_tail() {
        let client =
            MockLlmClient::from_steps("summary", vec![MockStep::text("They greeted each other.")]);
        let mut mem = memory(&client, 30, 2);

        mem.append_turn(long("a"), long("b")).await.unwrap();
        mem.append_turn(long("c"), long("d")).await.unwrap();

        assert_eq!(client.requests().await.len(), 1);
        assert_eq!(mem.summary(), Some("They greeted each other."));
        assert_eq!(
            mem.buffer(),
            &[Message::user(long("c")), Message::assistant(long("d"))]
        );

        let context = mem.get_context();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].content.contains("They greeted each other."));
    }

    #[tokio::test]
    async fn progressive_summary_includes_previous_summary() {
        let client = MockLlmClient::from_steps(
            "summary",
            vec![MockStep::text("first summary"), MockStep::text("second summary")],
        );
        let mut mem = memory(&client, 30, 2);

        mem.append_turn(long("a"), long("b")).await.unwrap();
        mem.append_turn(long("c"), long("d")).await.unwrap();
        mem.append_turn(long("e"), long("f")).await.unwrap();

        let requests = client.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages[0].content.contains("first summary"));
        assert_eq!(mem.summary(), Some("second summary"));
    }

    #[tokio::test]
    async fn failed_summarization_leaves_prior_context() {
        let client = MockLlmClient::from_steps("summary", vec![MockStep::error("down")]);
        let mut mem = memory(&client, 30, 2);

        mem.append_turn(long("a"), long("b")).await.unwrap();
        let err = mem.append_turn(long("c"), long("d")).await.unwrap_err();

        assert!(matches!(err, AiError::Summarization(_)));
        assert!(mem.summary().is_none());
        assert_eq!(mem.buffer().len(), 4);
        assert_eq!(mem.buffer()[0], Message::user(long("a")));
    }

    #[tokio::test]
    async fn oversized_tail_is_never_summarized() {
        let client = MockLlmClient::new("summary");
        let mut mem = memory(&client, 5, 2);

        mem.append_turn(long("a"), long("b")).await.unwrap();

        assert!(client.requests().await.is_empty());
        assert_eq!(mem.buffer().len(), 2);
    }

    #[test]
    fn token_estimate_counts_characters() {
        assert_eq!(estimate_tokens(&Message::user("")), 1);
        assert_eq!(estimate_tokens(&Message::user("abcdefgh")), 3);
        assert_eq!(estimate_tokens(&Message::user("éééé")), 2);
    }
}
