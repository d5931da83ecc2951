//! Tool-call interrupt protocol.
//!
//! Generated text requests a tool by embedding exactly one JSON object in a
//! tagged block:
//!
//! ```text
//! Let me look that up.
//! <tool_call>{"name": "search", "arguments": {"query": "x"}}</tool_call>
//! ```
//!
//! The result is fed back as:
//!
//! ```text
//! <tool_response>{"hits": 3}</tool_response>
//! ```
//!
//! Only the first complete block in a text is honored per pass. A block that
//! is opened but never closed is not a tool call.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ToolContext, ToolRegistry};
use crate::core::events::ToolOutput;

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";
pub const TOOL_RESPONSE_OPEN: &str = "<tool_response>";
pub const TOOL_RESPONSE_CLOSE: &str = "</tool_response>";

/// Longest payload excerpt kept in a [`MalformedToolCall`].
const MAX_PAYLOAD_EXCERPT: usize = 200;

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// A tool-call block was present but its payload could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedToolCall {
    pub message: String,
    /// Truncated raw payload.
    pub payload: String,
}

impl fmt::Display for MalformedToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed tool call: {}", self.message)
    }
}

impl std::error::Error for MalformedToolCall {}

/// Outcome of scanning text for a tool-call block.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallScan {
    Call(ParsedToolCall),
    NoCall,
    Malformed(MalformedToolCall),
}

/// Outcome of resolving one interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptOutcome {
    /// No tool-call block in the text; nothing was invoked.
    NoInterrupt,
    /// The tool ran (successfully or not) and its result is wrapped in `response`.
    Resolved {
        call: ParsedToolCall,
        output: ToolOutput,
        response: String,
    },
    /// The named tool is not registered; `response` carries the error payload.
    ToolNotFound { name: String, response: String },
}

impl InterruptOutcome {
    /// Wrapped `<tool_response>` text to feed back, if any.
    pub fn response(&self) -> Option<&str> {
        match self {
            InterruptOutcome::NoInterrupt => None,
            InterruptOutcome::Resolved { response, .. }
            | InterruptOutcome::ToolNotFound { response, .. } => Some(response),
        }
    }

    /// Name of the tool the interrupt asked for.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            InterruptOutcome::NoInterrupt => None,
            InterruptOutcome::Resolved { call, .. } => Some(&call.name),
            InterruptOutcome::ToolNotFound { name, .. } => Some(name),
        }
    }
}

/// Locates the first complete block, returning (block start, payload range end, block end).
fn find_block(text: &str) -> Option<(usize, usize, usize)> {
    let start = text.find(TOOL_CALL_OPEN)?;
    let payload_start = start + TOOL_CALL_OPEN.len();
    let close = text[payload_start..].find(TOOL_CALL_CLOSE)?;
    let payload_end = payload_start + close;
    Some((start, payload_end, payload_end + TOOL_CALL_CLOSE.len()))
}

/// Checks whether `text` contains a complete tool-call block.
pub fn contains_tool_call(text: &str) -> bool {
    find_block(text).is_some()
}

/// Text preceding the first tool-call block, trimmed; `None` when empty or
/// when there is no block.
pub fn text_before_tool_call(text: &str) -> Option<&str> {
    let (start, _, _) = find_block(text)?;
    let before = text[..start].trim();
    (!before.is_empty()).then_some(before)
}

fn truncate_payload(payload: &str) -> String {
    if payload.len() <= MAX_PAYLOAD_EXCERPT {
        return payload.to_string();
    }
    let mut end = MAX_PAYLOAD_EXCERPT;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &payload[..end], payload.len())
}

fn malformed(message: impl Into<String>, payload: &str) -> ToolCallScan {
    ToolCallScan::Malformed(MalformedToolCall {
        message: message.into(),
        payload: truncate_payload(payload),
    })
}

/// Scans `text` for the first tool-call block and parses its payload.
///
/// `arguments` may be omitted (treated as `{}`) but must be an object when
/// present, and `name` must not be blank. The name is kept verbatim; lookup
/// is by exact name.
pub fn scan_tool_call(text: &str) -> ToolCallScan {
    let Some((start, payload_end, _)) = find_block(text) else {
        return ToolCallScan::NoCall;
    };
    let payload = text[start + TOOL_CALL_OPEN.len()..payload_end].trim();

    let raw: RawToolCall = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => return malformed(format!("invalid JSON payload: {e}"), payload),
    };

    if raw.name.trim().is_empty() {
        return malformed("tool name is empty", payload);
    }

    let arguments = match raw.arguments {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => args,
        Some(_) => return malformed("`arguments` must be a JSON object", payload),
    };

    ToolCallScan::Call(ParsedToolCall {
        name: raw.name,
        arguments,
    })
}

/// Wraps a JSON result as a `<tool_response>` block.
pub fn format_tool_response(value: &Value) -> String {
    format!("{TOOL_RESPONSE_OPEN}{value}{TOOL_RESPONSE_CLOSE}")
}

/// Detects and resolves one tool-call interrupt in `text`.
///
/// Only the first block is honored. A tool name missing from `tools` is a
/// reportable outcome, not an error.
///
/// # Errors
/// Returns [`MalformedToolCall`] when a block is present but its payload
/// cannot be parsed.
pub async fn process_interrupt(
    text: &str,
    tools: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<InterruptOutcome, MalformedToolCall> {
    let call = match scan_tool_call(text) {
        ToolCallScan::NoCall => return Ok(InterruptOutcome::NoInterrupt),
        ToolCallScan::Malformed(err) => return Err(err),
        ToolCallScan::Call(call) => call,
    };

    tracing::debug!(tool = %call.name, "resolving tool-call interrupt");

    match tools.execute_tool(&call.name, &call.arguments, ctx).await {
        Some(output) => {
            let response = format_tool_response(&output.to_response_value());
            Ok(InterruptOutcome::Resolved {
                call,
                output,
                response,
            })
        }
        None => {
            tracing::debug!(tool = %call.name, "tool not found");
            Ok(InterruptOutcome::ToolNotFound {
                response: format_tool_response(&ToolOutput::not_found().to_response_value()),
                name: call.name,
            })
        }
    }
}
