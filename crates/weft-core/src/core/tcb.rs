//! Task control blocks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique TCB identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TcbId(Uuid);

impl TcbId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TcbId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TcbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Execution status of a session.
///
/// ```text
/// Standby ──(orchestrator)──▶ Active ◀──(sync pulse)── Suspended
///                              │  ▲
///      tool marker / drift ────┘  └──── tool result consumed / sync pulse
///                            Interrupt
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcbStatus {
    Active,
    Suspended,
    Interrupt,
    /// Admitted but not yet scheduled. Owned by the orchestrator.
    Standby,
}

impl fmt::Display for TcbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcbStatus::Active => write!(f, "active"),
            TcbStatus::Suspended => write!(f, "suspended"),
            TcbStatus::Interrupt => write!(f, "interrupt"),
            TcbStatus::Standby => write!(f, "standby"),
        }
    }
}

/// Marker for an outstanding tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTool {
    Pending,
}

/// Per-session execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskControlBlock {
    pub id: TcbId,
    pub session_id: String,
    pub focus: String,
    pub active_tool: Option<ActiveTool>,
    /// Nested reasoning contexts; reserved, always 0 today.
    pub stack_depth: u32,
    pub priority: i32,
    pub drift: f64,
    pub status: TcbStatus,
    /// Creation order; breaks scheduling ties.
    pub seq: u64,
    pub steps: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl TaskControlBlock {
    pub(crate) fn new(
        session_id: impl Into<String>,
        focus: impl Into<String>,
        priority: i32,
        status: TcbStatus,
        seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TcbId::new(),
            session_id: session_id.into(),
            focus: focus.into(),
            active_tool: None,
            stack_depth: 0,
            priority,
            drift: 0.0,
            status,
            seq,
            steps: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.status == TcbStatus::Interrupt
    }

    pub fn has_pending_tool(&self) -> bool {
        self.active_tool == Some(ActiveTool::Pending)
    }
}
