//! ChatFlow Traits - the tool contract shared by the agent loop and the server.
//!
//! - `Tool` trait with a static JSON schema
//! - `ToolOutput` / `ToolSchema` value types
//! - `ToolError` and the `ToolRegistry` that resolves tools by name

pub mod error;
pub mod registry;
pub mod tool;

pub use error::{Result as ToolResult, ToolError};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolOutput, ToolSchema};
