//! Task event types and the tool output envelope.
//!
//! Events are emitted by the orchestrator over a bounded channel so hosts
//! can render progress. They are serializable for JSON output.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Events emitted while a task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task admitted; context recalled.
    TaskStarted { session_id: String, recalled: bool },

    /// One kernel execution finished.
    StepCompleted {
        session_id: String,
        /// 0 for the initial step, then 1..=max passes.
        pass: usize,
        drift: f64,
        interrupted: bool,
    },

    /// A tool call was parsed and is about to run.
    ToolStarted { session_id: String, name: String },

    /// A tool call finished (or was not found, timed out, ...).
    ToolCompleted {
        session_id: String,
        name: String,
        output: ToolOutput,
    },

    /// A synchronization pulse realigned every session.
    SyncPulse { reconciled: String, sessions: usize },

    /// A memory archival attempt failed (the task still succeeds).
    ArchiveFailed { session_id: String, message: String },

    /// Task finished with its final response.
    TaskCompleted {
        session_id: String,
        final_text: String,
        passes: usize,
    },

    /// Task aborted.
    TaskFailed { session_id: String, message: String },
}

/// Channel sender for task events.
pub type TaskEventTx = mpsc::Sender<Arc<TaskEvent>>;

/// Channel receiver for task events.
pub type TaskEventRx = mpsc::Receiver<Arc<TaskEvent>>;

/// Default capacity for task event channels.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded task event channel.
pub fn create_event_channel() -> (TaskEventTx, TaskEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Wrapper that knows which events may be dropped under backpressure.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: TaskEventTx,
}

impl EventSender {
    pub fn new(tx: TaskEventTx) -> Self {
        Self { tx }
    }

    /// Best-effort send for progress events; dropped when the channel is full.
    pub fn send_delta(&self, ev: TaskEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Arc::new(ev)) {
            tracing::trace!("task event channel full, dropping progress event");
        }
    }

    /// Awaited send for events a host must not miss. Closed receivers are ignored.
    pub async fn send_important(&self, ev: TaskEvent) {
        let _ = self.tx.send(Arc::new(ev)).await;
    }
}

/// Structured result of one tool invocation.
///
/// The payload fed back to the model is built by
/// [`ToolOutput::to_response_value`]: success returns the raw data, failures
/// return an `{"error": ...}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutput {
    Success { data: Value },
    Failure { error: ToolError },
    /// Cancelled through the tool's cancellation token.
    Canceled { message: String },
}

/// Error details for failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error code and message for a tool name absent from the registry.
pub const TOOL_NOT_FOUND_CODE: &str = "tool_not_found";
pub const TOOL_NOT_FOUND_MESSAGE: &str = "Tool not found";

impl ToolOutput {
    pub fn success(data: Value) -> Self {
        ToolOutput::Success { data }
    }

    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        ToolOutput::Failure {
            error: ToolError {
                code: code.into(),
                message: message.into(),
                details,
            },
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        ToolOutput::Canceled {
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::failure(TOOL_NOT_FOUND_CODE, TOOL_NOT_FOUND_MESSAGE, None)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutput::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolOutput::Success { data } => Some(data),
            ToolOutput::Failure { .. } | ToolOutput::Canceled { .. } => None,
        }
    }

    /// Returns the error code if this is a failure or cancellation.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ToolOutput::Success { .. } => None,
            ToolOutput::Failure { error } => Some(error.code.as_str()),
            ToolOutput::Canceled { .. } => Some("canceled"),
        }
    }

    /// JSON payload placed inside a `<tool_response>` block.
    ///
    /// A missing tool yields exactly `{"error": "Tool not found"}`.
    pub fn to_response_value(&self) -> Value {
        match self {
            ToolOutput::Success { data } => data.clone(),
            ToolOutput::Failure { error } if error.code == TOOL_NOT_FOUND_CODE => {
                json!({ "error": error.message })
            }
            ToolOutput::Failure { error } => {
                let mut value = json!({ "error": error.message, "code": error.code });
                if let Some(details) = &error.details {
                    value["details"] = json!(details);
                }
                value
            }
            ToolOutput::Canceled { message } => json!({ "error": message, "code": "canceled" }),
        }
    }
}
