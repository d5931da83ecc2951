//! End-to-end task loop.
//!
//! A task recalls prior context, runs one kernel step, resolves at most
//! `max_interrupt_passes` tool calls, archives the final response and
//! triggers a sync pulse when global drift is due. Each task is admitted
//! with its own TCB, so overlapping tasks on one session never share
//! focus, drift or a pending tool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::core::events::{EventSender, TaskEvent, ToolOutput};
use crate::core::kernel::{GenerationError, Kernel, KernelError, KernelSettings, KernelState};
use crate::core::scheduler::CognitiveScheduler;
use crate::core::tcb::TcbId;
use crate::memory::{MemoryPage, MemorySubsystem, score_importance};
use crate::providers::GenerationProvider;
use crate::tools::protocol::{
    InterruptOutcome, MalformedToolCall, ToolCallScan, contains_tool_call, process_interrupt,
    scan_tool_call,
};
use crate::tools::{ToolContext, ToolRegistry};

/// Context handed to the first step when memory has nothing for the session.
pub const NO_PRIOR_CONTEXT: &str = "No prior context.";

/// Prefix of the query that feeds a tool result back to the kernel.
pub const TOOL_RESULT_PREFIX: &str = "TOOL_RESULT: ";

/// Why a task was aborted.
#[derive(Debug, Clone)]
pub enum TaskError {
    Generation(GenerationError),
    MalformedToolCall(MalformedToolCall),
    /// The task's TCB was reaped or released while the task was running.
    Released(TcbId),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Generation(err) => err.fmt(f),
            TaskError::MalformedToolCall(err) => err.fmt(f),
            TaskError::Released(id) => write!(f, "Task TCB {id} was released before completion"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Generation(err) => Some(err),
            TaskError::MalformedToolCall(err) => Some(err),
            TaskError::Released(_) => None,
        }
    }
}

impl From<GenerationError> for TaskError {
    fn from(err: GenerationError) -> Self {
        TaskError::Generation(err)
    }
}

impl From<KernelError> for TaskError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Generation(err) => TaskError::Generation(err),
            KernelError::UnknownTcb(id) => TaskError::Released(id),
        }
    }
}

impl From<MalformedToolCall> for TaskError {
    fn from(err: MalformedToolCall) -> Self {
        TaskError::MalformedToolCall(err)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_interrupt_passes: usize,
    pub tool_timeout: Duration,
    /// TCBs idle this long are reaped when the next task starts.
    pub task_ttl: Duration,
    pub release_on_completion: bool,
    pub importance_keyword: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_interrupt_passes: config.max_interrupt_passes,
            tool_timeout: config.tool_timeout(),
            task_ttl: config.task_ttl(),
            release_on_completion: config.release_on_completion,
            importance_keyword: config.importance_keyword.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Drives tasks against a kernel, a scheduler and a memory subsystem.
pub struct Orchestrator {
    kernel: Arc<Kernel>,
    scheduler: Arc<CognitiveScheduler>,
    memory: Arc<dyn MemorySubsystem>,
    settings: OrchestratorSettings,
    events: Option<EventSender>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("kernel", &self.kernel)
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        kernel: Arc<Kernel>,
        scheduler: Arc<CognitiveScheduler>,
        memory: Arc<dyn MemorySubsystem>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            kernel,
            scheduler,
            memory,
            settings,
            events: None,
        }
    }

    /// Wires a fresh kernel state, kernel and scheduler from `config`.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn GenerationProvider>,
        memory: Arc<dyn MemorySubsystem>,
    ) -> Self {
        let kernel = Kernel::new(
            KernelState::shared(),
            provider,
            KernelSettings::from_config(config),
        );
        let scheduler = CognitiveScheduler::new(config.drift_threshold);
        Self::new(
            Arc::new(kernel),
            Arc::new(scheduler),
            memory,
            OrchestratorSettings::from_config(config),
        )
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn scheduler(&self) -> &Arc<CognitiveScheduler> {
        &self.scheduler
    }

    pub fn memory(&self) -> &Arc<dyn MemorySubsystem> {
        &self.memory
    }

    /// Runs one task at the kernel's default priority.
    ///
    /// # Errors
    /// Fails if a generation step fails or a tool-call block cannot be
    /// parsed. Memory and sync failures never fail the task.
    pub async fn run_task(
        &self,
        session_id: &str,
        query: &str,
        tools: &ToolRegistry,
    ) -> Result<String, TaskError> {
        let priority = self.kernel.settings().default_priority;
        self.run_task_with_priority(session_id, query, tools, priority)
            .await
    }

    /// Runs one task, admitting it at `priority`.
    ///
    /// Idle TCBs left behind by abandoned tasks are reaped first. Dropping
    /// the returned future cancels any tool call in flight.
    ///
    /// # Errors
    /// Same as [`Orchestrator::run_task`], plus [`TaskError::Released`] if
    /// the task's TCB disappears mid-task.
    pub async fn run_task_with_priority(
        &self,
        session_id: &str,
        query: &str,
        tools: &ToolRegistry,
        priority: i32,
    ) -> Result<String, TaskError> {
        self.kernel.reap_idle(self.settings.task_ttl).await;
        let tcb_id = self.kernel.admit(session_id, priority).await;

        let result = self.drive(tcb_id, session_id, query, tools).await;

        if self.settings.release_on_completion {
            self.kernel.release_task(tcb_id).await;
        }

        match result {
            Ok((final_text, passes)) => {
                tracing::info!(session = %session_id, passes, "task completed");
                self.emit_important(TaskEvent::TaskCompleted {
                    session_id: session_id.to_string(),
                    final_text: final_text.clone(),
                    passes,
                })
                .await;
                Ok(final_text)
            }
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "task aborted");
                self.emit_important(TaskEvent::TaskFailed {
                    session_id: session_id.to_string(),
                    message: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        tcb_id: TcbId,
        session_id: &str,
        query: &str,
        tools: &ToolRegistry,
    ) -> Result<(String, usize), TaskError> {
        let recalled = self.recall_context(session_id).await;
        let context = recalled.as_deref().unwrap_or(NO_PRIOR_CONTEXT);

        self.kernel.activate(tcb_id).await;
        self.emit_important(TaskEvent::TaskStarted {
            session_id: session_id.to_string(),
            recalled: recalled.is_some(),
        })
        .await;

        let mut response = self.kernel.execute_task(tcb_id, query, context).await?;
        self.emit_step(tcb_id, session_id, 0).await;

        let tool_ctx = ToolContext::new(self.settings.tool_timeout);
        let _cancel_on_drop = tool_ctx.cancel.clone().drop_guard();
        let mut passes = 0;
        while passes < self.settings.max_interrupt_passes && contains_tool_call(&response) {
            if let ToolCallScan::Call(call) = scan_tool_call(&response) {
                self.emit(TaskEvent::ToolStarted {
                    session_id: session_id.to_string(),
                    name: call.name,
                });
            }

            let outcome = process_interrupt(&response, tools, &tool_ctx.child()).await?;
            let (name, output, tool_response) = match outcome {
                InterruptOutcome::NoInterrupt => break,
                InterruptOutcome::Resolved {
                    call,
                    output,
                    response,
                } => (call.name, output, response),
                InterruptOutcome::ToolNotFound { name, response } => {
                    (name, ToolOutput::not_found(), response)
                }
            };
            self.emit(TaskEvent::ToolCompleted {
                session_id: session_id.to_string(),
                name,
                output,
            });

            self.kernel.resolve_interrupt(tcb_id).await;
            let continuation_context = format!("{context}\n\n{response}");
            let continuation_query = format!("{TOOL_RESULT_PREFIX}{tool_response}");
            response = self
                .kernel
                .execute_task(tcb_id, &continuation_query, &continuation_context)
                .await?;
            passes += 1;
            self.emit_step(tcb_id, session_id, passes).await;
        }

        if passes == self.settings.max_interrupt_passes && contains_tool_call(&response) {
            tracing::debug!(session = %session_id, passes, "interrupt pass bound reached");
        }

        self.archive(session_id, &response, passes).await;
        self.sync_if_due().await;

        Ok((response, passes))
    }

    /// Recalled page content, or `None` on a miss. Recall errors count as a miss.
    async fn recall_context(&self, session_id: &str) -> Option<String> {
        match self.memory.recall(session_id).await {
            Ok(page) => page.map(|p| p.content),
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "memory recall failed");
                None
            }
        }
    }

    async fn archive(&self, session_id: &str, response: &str, passes: usize) {
        let importance = score_importance(response, &self.settings.importance_keyword);
        let mut tags = vec![format!("session:{session_id}")];
        if passes > 0 {
            tags.push("tool_use".to_string());
        }
        let page = MemoryPage::new(session_id, response, importance, tags);

        if let Err(err) = self.memory.manage_memory(page).await {
            tracing::warn!(session = %session_id, error = %err, "memory archival failed");
            self.emit(TaskEvent::ArchiveFailed {
                session_id: session_id.to_string(),
                message: err.to_string(),
            });
        }
    }

    async fn sync_if_due(&self) {
        let state = self.kernel.state();
        if !self.scheduler.needs_sync(state).await {
            return;
        }
        let report = self.scheduler.pulse(state).await;
        self.emit(TaskEvent::SyncPulse {
            reconciled: report.reconciled,
            sessions: report.tcbs,
        });
    }

    async fn emit_step(&self, tcb_id: TcbId, session_id: &str, pass: usize) {
        if self.events.is_none() {
            return;
        }
        if let Some(tcb) = self.kernel.tcb(tcb_id).await {
            self.emit(TaskEvent::StepCompleted {
                session_id: session_id.to_string(),
                pass,
                drift: tcb.drift,
                interrupted: tcb.is_interrupted(),
            });
        }
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(events) = &self.events {
            events.send_delta(event);
        }
    }

    async fn emit_important(&self, event: TaskEvent) {
        if let Some(events) = &self.events {
            events.send_important(event).await;
        }
    }
}
