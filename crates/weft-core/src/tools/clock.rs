//! Clock tool: reports the current UTC time.

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use super::ToolDefinition;
use crate::core::events::ToolOutput;

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "clock",
        "Returns the current UTC time. Optional `format`: \"rfc3339\" (default) or \"unix\".",
    )
}

pub fn execute(input: &Value) -> ToolOutput {
    let now = Utc::now();
    match input.get("format").and_then(Value::as_str).unwrap_or("rfc3339") {
        "rfc3339" => ToolOutput::success(json!({
            "now": now.to_rfc3339_opts(SecondsFormat::Secs, true)
        })),
        "unix" => ToolOutput::success(json!({ "now": now.timestamp() })),
        other => ToolOutput::failure(
            "invalid_input",
            format!("Unknown format '{other}'"),
            Some("Expected \"rfc3339\" or \"unix\"".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_format_is_number() {
        let output = execute(&json!({"format": "unix"}));
        assert!(output.data().unwrap()["now"].is_i64());
    }

    #[test]
    fn test_unknown_format_fails() {
        let output = execute(&json!({"format": "julian"}));
        assert_eq!(output.error_code(), Some("invalid_input"));
    }
}
