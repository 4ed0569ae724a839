//! Error types for the AI module

use chatflow_traits::ToolError;
use thiserror::Error;

/// AI module error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error (HTTP {status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Stream encoding error: {0}")]
    StreamEncoding(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad client input. Reported before any stream starts.
    Validation,
    /// Provider transport, auth or rate-limit failure.
    Upstream,
    /// Tool lookup or execution failure. Fed back to the agent loop.
    ToolInvocation,
    /// Memory compaction failure. Raw history is kept.
    Summarization,
    /// Wire serialization failure. Aborts the stream.
    StreamEncoding,
    Internal,
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::Validation(_) => ErrorKind::Validation,
            AiError::Llm(_) | AiError::LlmHttp { .. } | AiError::Http(_) | AiError::Json(_) => {
                ErrorKind::Upstream
            }
            AiError::Tool(_) => ErrorKind::ToolInvocation,
            AiError::Summarization(_) => ErrorKind::Summarization,
            AiError::StreamEncoding(_) => ErrorKind::StreamEncoding,
            AiError::Agent(_) => ErrorKind::Internal,
        }
    }

    /// Whether a provider call that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::LlmHttp { status, .. } => matches!(status, 408 | 409 | 429) || *status >= 500,
            AiError::Http(err) => err.is_timeout() || err.is_connect(),
            AiError::Llm(message) => {
                let message = message.to_ascii_lowercase();
                ["rate limit", "timeout", "timed out", "overloaded", "temporarily"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
            _ => false,
        }
    }

    /// Server-provided retry hint in seconds, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AiError::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for AI operations
pub type Result<T> = std::result::Result<T, AiError>;
