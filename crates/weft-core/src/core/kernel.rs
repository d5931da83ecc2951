//! Reasoning kernel.
//!
//! Owns task control blocks and runs single generation steps against the
//! injected provider. [`Kernel::execute`] works on a session's resident TCB,
//! so sequential steps of one session accumulate drift; tasks admitted with
//! [`Kernel::admit`] get a TCB of their own and step it through
//! [`Kernel::execute_task`], so concurrent tasks never share one.
//!
//! All TCB and global drift mutations happen under the [`SharedKernelState`]
//! lock; the lock is never held while awaiting the provider.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::core::tcb::{ActiveTool, TaskControlBlock, TcbId, TcbStatus};
use crate::providers::{GenerationProvider, ProviderError};
use crate::tools::protocol::contains_tool_call;

/// Tolerance for comparing accumulated drift against a threshold, so that
/// ten steps of 0.05 reach 0.5 despite float rounding.
pub const DRIFT_EPSILON: f64 = 1e-9;

/// Returns true when `drift` has reached `threshold`.
pub fn drift_reached(drift: f64, threshold: f64) -> bool {
    drift + DRIFT_EPSILON >= threshold
}

/// Process-wide kernel context: every TCB plus the global drift counter.
///
/// `sessions` points at the newest TCB of each session. `global_drift` is
/// maintained incrementally; because every update happens under the same
/// lock as the TCB it belongs to, it equals the sum of live TCB drift up to
/// float rounding.
#[derive(Debug, Default)]
pub struct KernelState {
    tcbs: HashMap<TcbId, TaskControlBlock>,
    sessions: HashMap<String, TcbId>,
    global_drift: f64,
    next_seq: u64,
}

/// Kernel state behind the lock shared by kernel and scheduler.
pub type SharedKernelState = Arc<Mutex<KernelState>>;

impl KernelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedKernelState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.tcbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tcbs.is_empty()
    }

    pub fn global_drift(&self) -> f64 {
        self.global_drift
    }

    pub fn get(&self, id: TcbId) -> Option<&TaskControlBlock> {
        self.tcbs.get(&id)
    }

    /// Newest TCB of `session_id`.
    pub fn session(&self, session_id: &str) -> Option<&TaskControlBlock> {
        self.sessions.get(session_id).and_then(|id| self.tcbs.get(id))
    }

    /// TCBs in creation order.
    pub fn snapshot(&self) -> Vec<TaskControlBlock> {
        let mut tcbs: Vec<_> = self.tcbs.values().cloned().collect();
        tcbs.sort_by_key(|t| t.seq);
        tcbs
    }

    pub(crate) fn tcbs_mut(&mut self) -> impl Iterator<Item = &mut TaskControlBlock> {
        self.tcbs.values_mut()
    }

    pub(crate) fn reset_global_drift(&mut self) {
        self.global_drift = 0.0;
    }

    fn create(&mut self, session_id: &str, focus: &str, priority: i32, status: TcbStatus) -> TcbId {
        self.next_seq += 1;
        let tcb = TaskControlBlock::new(session_id, focus, priority, status, self.next_seq);
        let id = tcb.id;
        self.sessions.insert(session_id.to_string(), id);
        self.tcbs.insert(id, tcb);
        id
    }

    /// Returns the session's resident TCB id, creating the TCB if absent.
    fn ensure_session(
        &mut self,
        session_id: &str,
        focus: &str,
        priority: i32,
        status: TcbStatus,
    ) -> TcbId {
        match self.sessions.get(session_id) {
            Some(id) => *id,
            None => self.create(session_id, focus, priority, status),
        }
    }

    fn remove(&mut self, id: TcbId) -> Option<TaskControlBlock> {
        let tcb = self.tcbs.remove(&id)?;
        if self.sessions.get(&tcb.session_id) == Some(&id) {
            let newest = self
                .tcbs
                .values()
                .filter(|t| t.session_id == tcb.session_id)
                .max_by_key(|t| t.seq)
                .map(|t| t.id);
            match newest {
                Some(next) => {
                    self.sessions.insert(tcb.session_id.clone(), next);
                }
                None => {
                    self.sessions.remove(&tcb.session_id);
                }
            }
        }
        self.global_drift = (self.global_drift - tcb.drift).max(0.0);
        Some(tcb)
    }
}

/// The generation provider failed; the TCB was left untouched.
#[derive(Debug, Clone)]
pub struct GenerationError {
    pub session_id: String,
    pub source: ProviderError,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Generation failed for session '{}' ({}): {}",
            self.session_id, self.source.kind, self.source.message
        )
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Failure of a step on an admitted task.
#[derive(Debug, Clone)]
pub enum KernelError {
    Generation(GenerationError),
    /// The TCB was released or reaped before the step started.
    UnknownTcb(TcbId),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Generation(err) => err.fmt(f),
            KernelError::UnknownTcb(id) => write!(f, "No resident TCB {id}"),
        }
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KernelError::Generation(err) => Some(err),
            KernelError::UnknownTcb(_) => None,
        }
    }
}

impl From<GenerationError> for KernelError {
    fn from(err: GenerationError) -> Self {
        KernelError::Generation(err)
    }
}

/// Kernel tunables, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct KernelSettings {
    pub system_prompt: String,
    pub drift_increment: f64,
    pub drift_threshold: f64,
    pub default_priority: i32,
}

impl KernelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.effective_system_prompt().to_string(),
            drift_increment: config.drift_increment,
            drift_threshold: config.drift_threshold,
            default_priority: config.default_priority,
        }
    }
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Runs generation steps and tracks per-session state.
pub struct Kernel {
    state: SharedKernelState,
    provider: Arc<dyn GenerationProvider>,
    settings: KernelSettings,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(
        state: SharedKernelState,
        provider: Arc<dyn GenerationProvider>,
        settings: KernelSettings,
    ) -> Self {
        Self {
            state,
            provider,
            settings,
        }
    }

    /// Shared state handle, for the scheduler.
    pub fn state(&self) -> &SharedKernelState {
        &self.state
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// Executes exactly one generation step on the session's resident TCB.
    ///
    /// The TCB is created on first use. After a successful step its drift
    /// (and the global drift) grow by the configured increment; a tool-call
    /// block marks the tool pending and the status `Interrupt`, as does
    /// drift reaching the threshold. Missing tool calls are not an error;
    /// callers interpret the returned text.
    ///
    /// # Errors
    /// Returns [`GenerationError`] if the provider fails. The TCB keeps the
    /// state it had before the step.
    pub async fn execute(
        &self,
        session_id: &str,
        query: &str,
        context: &str,
    ) -> Result<String, GenerationError> {
        let tcb_id = self.state.lock().await.ensure_session(
            session_id,
            query,
            self.settings.default_priority,
            TcbStatus::Active,
        );
        self.step(tcb_id, session_id, query, context).await
    }

    /// Executes one generation step on the TCB of an admitted task.
    ///
    /// Same commit rules as [`Kernel::execute`]; only `tcb_id` is touched.
    ///
    /// # Errors
    /// Returns [`KernelError::UnknownTcb`] if the TCB is gone, or
    /// [`KernelError::Generation`] if the provider fails.
    pub async fn execute_task(
        &self,
        tcb_id: TcbId,
        query: &str,
        context: &str,
    ) -> Result<String, KernelError> {
        let session_id = self
            .state
            .lock()
            .await
            .get(tcb_id)
            .map(|t| t.session_id.clone())
            .ok_or(KernelError::UnknownTcb(tcb_id))?;
        Ok(self.step(tcb_id, &session_id, query, context).await?)
    }

    async fn step(
        &self,
        tcb_id: TcbId,
        session_id: &str,
        query: &str,
        context: &str,
    ) -> Result<String, GenerationError> {
        let output = self
            .provider
            .generate(&self.settings.system_prompt, context, query)
            .await
            .map_err(|source| {
                tracing::warn!(session = %session_id, error = %source, "generation step failed");
                GenerationError {
                    session_id: session_id.to_string(),
                    source,
                }
            })?;

        let tool_requested = contains_tool_call(&output);
        let increment = self.settings.drift_increment;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(tcb) = state.tcbs.get_mut(&tcb_id) else {
            tracing::debug!(session = %session_id, tcb = %tcb_id, "tcb released mid-step, dropping update");
            return Ok(output);
        };

        tcb.focus = query.to_string();
        tcb.steps += 1;
        tcb.last_active_at = Utc::now();
        if tool_requested {
            tcb.active_tool = Some(ActiveTool::Pending);
            tcb.status = TcbStatus::Interrupt;
        }
        tcb.drift += increment;
        state.global_drift += increment;
        if drift_reached(tcb.drift, self.settings.drift_threshold) {
            tcb.status = TcbStatus::Interrupt;
        }

        tracing::debug!(
            session = %session_id,
            tcb = %tcb_id,
            drift = tcb.drift,
            status = %tcb.status,
            tool_requested,
            "kernel step committed"
        );
        Ok(output)
    }

    /// Admits a new task for `session_id` with a fresh TCB in `Standby`.
    ///
    /// The TCB becomes the session's resident one.
    pub async fn admit(&self, session_id: &str, priority: i32) -> TcbId {
        self.state
            .lock()
            .await
            .create(session_id, "", priority, TcbStatus::Standby)
    }

    /// Moves a `Standby` TCB to `Active`. Returns false otherwise.
    pub async fn activate(&self, id: TcbId) -> bool {
        let mut state = self.state.lock().await;
        match state.tcbs.get_mut(&id) {
            Some(tcb) if tcb.status == TcbStatus::Standby => {
                tcb.status = TcbStatus::Active;
                true
            }
            _ => false,
        }
    }

    /// Records that the pending tool result has been consumed.
    ///
    /// Clears the pending marker and returns an interrupted TCB to `Active`,
    /// unless its drift has reached the threshold; drift interrupts are
    /// cleared only by a sync pulse. Returns the new status.
    pub async fn resolve_interrupt(&self, id: TcbId) -> Option<TcbStatus> {
        let threshold = self.settings.drift_threshold;
        let mut state = self.state.lock().await;
        let tcb = state.tcbs.get_mut(&id)?;
        tcb.active_tool = None;
        if tcb.status == TcbStatus::Interrupt && !drift_reached(tcb.drift, threshold) {
            tcb.status = TcbStatus::Active;
        }
        Some(tcb.status)
    }

    pub async fn set_priority(&self, id: TcbId, priority: i32) -> bool {
        let mut state = self.state.lock().await;
        match state.tcbs.get_mut(&id) {
            Some(tcb) => {
                tcb.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Removes a TCB and subtracts its drift from the global counter.
    pub async fn release_task(&self, id: TcbId) -> Option<TaskControlBlock> {
        let released = self.state.lock().await.remove(id);
        if let Some(tcb) = &released {
            tracing::debug!(session = %tcb.session_id, tcb = %id, "released tcb");
        }
        released
    }

    /// Removes every TCB of `session_id`.
    pub async fn release_session(&self, session_id: &str) -> Vec<TaskControlBlock> {
        let mut state = self.state.lock().await;
        let ids: Vec<TcbId> = state
            .tcbs
            .values()
            .filter(|t| t.session_id == session_id)
            .map(|t| t.id)
            .collect();
        let mut released: Vec<_> = ids.into_iter().filter_map(|id| state.remove(id)).collect();
        released.sort_by_key(|t| t.seq);
        released
    }

    /// Removes every TCB idle for at least `ttl`. Returns how many were reaped.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let expired: Vec<TcbId> = state
            .tcbs
            .values()
            .filter(|t| now.signed_duration_since(t.last_active_at) >= ttl)
            .map(|t| t.id)
            .collect();
        for id in &expired {
            state.remove(*id);
        }
        if !expired.is_empty() {
            tracing::info!(reaped = expired.len(), "reaped idle tcbs");
        }
        expired.len()
    }

    pub async fn tcb(&self, id: TcbId) -> Option<TaskControlBlock> {
        self.state.lock().await.get(id).cloned()
    }

    pub async fn tcb_for_session(&self, session_id: &str) -> Option<TaskControlBlock> {
        self.state.lock().await.session(session_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<TaskControlBlock> {
        self.state.lock().await.snapshot()
    }

    pub async fn global_drift(&self) -> f64 {
        self.state.lock().await.global_drift()
    }
}
