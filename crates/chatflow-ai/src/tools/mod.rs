//! Agent tools
//!
//! Tools implement the `Tool` trait from `chatflow-traits` and are exposed to
//! the agent through a `ToolRegistry`.

mod add_numbers;

pub use add_numbers::AddNumbersTool;
pub use chatflow_traits::{Tool, ToolError, ToolOutput, ToolRegistry, ToolSchema};

/// Create a registry with default tools
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(AddNumbersTool::new());
    registry
}
