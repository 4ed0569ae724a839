pub mod chat;
pub mod health;

pub use chat::{SESSION_HEADER, StreamQuery, chat_direct, chat_stream};
pub use health::{health, hi};
