//! ChatFlow server - axum front end for the chat pipeline
//!
//! Routes:
//! - `POST /chat-stream`, `POST /api/chat` stream a reply (`?protocol=data|text`)
//! - `POST /chat` returns a complete reply from the direct model
//! - `GET /health`, `GET /hi`

pub mod api;
pub mod config;
pub mod error;
pub mod router;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
