//! Agent state management

use serde::{Deserialize, Serialize};

use crate::llm::{Message, TokenUsage};

/// Agent execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed { error: String },
    MaxIterations,
}

/// State of one agent execution.
///
/// The scratchpad holds the assistant tool-call turns and their observations
/// for this execution only; it is discarded when the execution ends.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub execution_id: String,
    pub status: AgentStatus,
    pub scratchpad: Vec<Message>,
    pub iteration: usize,
    pub max_iterations: usize,
    /// Every text fragment emitted so far, concatenated.
    pub reply: String,
    /// Usage summed across iterations.
    pub usage: TokenUsage,
}

impl AgentState {
    pub fn new(execution_id: String, max_iterations: usize) -> Self {
        Self {
            execution_id,
            status: AgentStatus::Running,
            scratchpad: Vec::new(),
            iteration: 0,
            max_iterations,
            reply: String::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.scratchpad.push(message);
    }

    pub fn add_tool_result(&mut self, tool_call_id: String, result: String) {
        self.add_message(Message::tool_result(tool_call_id, result));
    }

    pub fn push_text(&mut self, text: &str) {
        self.reply.push_str(text);
    }

    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }

    pub fn complete(&mut self) {
        self.status = AgentStatus::Completed;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AgentStatus::Failed {
            error: error.into(),
        };
    }

    pub fn max_iterations_reached(&mut self) {
        self.status = AgentStatus::MaxIterations;
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, AgentStatus::Running)
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}
