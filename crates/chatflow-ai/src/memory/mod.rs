//! Conversation memory
//!
//! - **Summary buffer**: recent messages kept verbatim, older ones folded into a
//!   running summary by a secondary model once a token budget is exceeded
//! - **Session store**: one memory per session id, each behind its own mutex,
//!   least recently used sessions evicted past a cap

mod session;
mod summary_buffer;

pub use session::{DEFAULT_SESSION_ID, SessionMemoryStore, SharedMemory};
pub use summary_buffer::{
    ConversationMemory, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TOKEN_LIMIT, DEFAULT_MIN_TAIL_MESSAGES, MemoryConfig,
    SUMMARY_PROMPT, estimate_tokens, estimate_total_tokens,
};
