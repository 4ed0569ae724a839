//! Agent module - tool-calling loop over a streaming LLM
//!
//! 1. Build the prompt from system instruction, prior context, input and scratchpad
//! 2. Stream a completion, forwarding text as it arrives
//! 3. Run requested tools and record their observations
//! 4. Repeat until the model answers or `max_iterations` is reached

mod executor;
mod prompt;
mod state;
mod stream;

pub use executor::{
    AgentConfig, AgentExecutor, AgentOutcome, AgentRequest, DEFAULT_AGENT_PROMPT,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOOL_RESULT_LENGTH, DEFAULT_TOOL_TIMEOUT,
};
pub use prompt::build_messages;
pub use state::{AgentState, AgentStatus};
pub use stream::{ChannelEmitter, NullEmitter, StreamEmitter, ToolCallAccumulator};
