//! Sleep tool: waits for `ms` milliseconds, honoring cancellation.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition};
use crate::core::events::ToolOutput;

#[derive(Debug, Deserialize)]
struct SleepInput {
    ms: u64,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "sleep",
        "Waits for `ms` milliseconds, then returns. Stops early when cancelled.",
    )
}

pub async fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: SleepInput = match serde_json::from_value(input.clone()) {
        Ok(input) => input,
        Err(e) => {
            return ToolOutput::failure(
                "invalid_input",
                "Invalid input for sleep",
                Some(format!("Parse error: {e}")),
            );
        }
    };

    tokio::select! {
        () = ctx.cancel.cancelled() => ToolOutput::canceled("Sleep cancelled"),
        () = tokio::time::sleep(Duration::from_millis(input.ms)) => {
            ToolOutput::success(json!({ "slept_ms": input.ms }))
        }
    }
}
