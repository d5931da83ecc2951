//! Echo tool: returns its arguments unchanged.

use serde_json::{Value, json};

use super::ToolDefinition;
use crate::core::events::ToolOutput;

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("echo", "Returns the supplied arguments unchanged.")
}

pub fn execute(input: &Value) -> ToolOutput {
    ToolOutput::success(json!({ "echo": input }))
}
