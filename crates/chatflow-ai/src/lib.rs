//! ChatFlow AI - streaming chat pipeline
//!
//! This crate provides:
//! - Message model normalizing client chat payloads
//! - OpenAI-compatible streaming LLM client with retries
//! - Tool-calling agent loop with bounded iterations
//! - Summary-buffer conversation memory keyed by session
//! - Completion driver relaying tokens from a background generation task
//! - Data stream encoder for the wire protocol

pub mod agent;
pub mod driver;
pub mod error;
mod http_client;
pub mod llm;
pub mod memory;
pub mod message;
pub mod protocol;
pub mod tools;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentExecutor, AgentOutcome, AgentRequest, StreamEmitter};
pub use driver::{
    CompletionDriver, CompletionResult, DirectReply, DriverMode, FinishReason, GenerationEvent,
    GenerationStream, Usage,
};
pub use error::{AiError, ErrorKind, Result};
pub use llm::{LlmClient, LlmRetryConfig, Message, OpenAIClient, Role};
pub use memory::{ConversationMemory, MemoryConfig, SessionMemoryStore};
pub use message::{ChatInput, ChatRequest, ClientMessage};
pub use protocol::{StreamProtocol, encode_finish, encode_stream, encode_token};
pub use tools::{AddNumbersTool, Tool, ToolOutput, ToolRegistry, ToolSchema, default_registry};
