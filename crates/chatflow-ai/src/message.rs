//! Client chat payloads and their normalization into provider messages.

use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};
use crate::llm::{Message, Role};

/// Body accepted by the chat endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ClientMessage>,
    #[serde(
        default,
        rename = "sessionId",
        alias = "session_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
}

/// One turn as sent by a chat UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

impl ClientMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
        }
    }
}

/// Message content is either a plain string or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageContent {
    /// Flatten to text. Non-text parts are dropped.
    pub fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter(|part| part.kind == "text")
                .filter_map(|part| part.text)
                .collect(),
        }
    }
}

fn parse_role(role: &str) -> Result<Role> {
    match role.trim().to_ascii_lowercase().as_str() {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(AiError::Validation(format!(
            "Unsupported message role: {other}"
        ))),
    }
}

impl ChatRequest {
    pub fn new(messages: Vec<ClientMessage>) -> Self {
        Self {
            messages,
            session_id: None,
        }
    }

    /// Validate and normalize the payload.
    ///
    /// Fails when the list is empty, when a role is unknown, or when no
    /// `user` message is present.
    pub fn into_input(self) -> Result<ChatInput> {
        if self.messages.is_empty() {
            return Err(AiError::Validation("No messages provided".to_string()));
        }

        let messages = self
            .messages
            .into_iter()
            .map(|m| Ok(Message::new(parse_role(&m.role)?, m.content.into_text())))
            .collect::<Result<Vec<_>>>()?;

        let active_index = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| AiError::Validation("No user message provided".to_string()))?;

        Ok(ChatInput {
            messages,
            active_index,
        })
    }
}

/// Validated conversation with the active user turn identified.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    messages: Vec<Message>,
    active_index: usize,
}

impl ChatInput {
    /// Content of the most recent user message.
    pub fn active_input(&self) -> &str {
        &self.messages[self.active_index].content
    }

    /// Everything before the active input.
    pub fn history(&self) -> &[Message] {
        &self.messages[..self.active_index]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
