//! Cognitive scheduler: priority ordering and synchronization pulses.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::kernel::{SharedKernelState, drift_reached};
use crate::core::tcb::{TaskControlBlock, TcbStatus};

/// Context string produced by [`DefaultSyncHook`].
pub const DEFAULT_SYNC_CONTEXT: &str = "Global context synchronized.";

pub type SyncFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// Reconciles shared context while every session is suspended.
///
/// Called with the kernel lock held; implementations must not touch the
/// kernel.
pub trait SyncHook: Send + Sync {
    fn reconcile<'a>(&'a self, tcbs: &'a [TaskControlBlock]) -> SyncFuture<'a>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSyncHook;

impl SyncHook for DefaultSyncHook {
    fn reconcile<'a>(&'a self, _tcbs: &'a [TaskControlBlock]) -> SyncFuture<'a> {
        Box::pin(async { DEFAULT_SYNC_CONTEXT.to_string() })
    }
}

/// Outcome of one pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub reconciled: String,
    /// TCBs realigned.
    pub tcbs: usize,
    /// Global drift before the reset.
    pub drift_cleared: f64,
    /// 1-based pulse counter for this scheduler.
    pub pulse: u64,
}

pub struct CognitiveScheduler {
    hook: Arc<dyn SyncHook>,
    drift_threshold: f64,
    pulses: AtomicU64,
}

impl fmt::Debug for CognitiveScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitiveScheduler")
            .field("drift_threshold", &self.drift_threshold)
            .field("pulses", &self.pulses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CognitiveScheduler {
    pub fn new(drift_threshold: f64) -> Self {
        Self::with_hook(drift_threshold, Arc::new(DefaultSyncHook))
    }

    pub fn with_hook(drift_threshold: f64, hook: Arc<dyn SyncHook>) -> Self {
        Self {
            hook,
            drift_threshold,
            pulses: AtomicU64::new(0),
        }
    }

    /// Orders TCBs by priority, highest first. Equal priorities keep
    /// creation order. Does not mutate anything.
    pub fn schedule(&self, tcbs: &[TaskControlBlock]) -> Vec<TaskControlBlock> {
        let mut ordered = tcbs.to_vec();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        ordered
    }

    /// True when global drift has reached the threshold.
    pub async fn needs_sync(&self, state: &SharedKernelState) -> bool {
        drift_reached(state.lock().await.global_drift(), self.drift_threshold)
    }

    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    /// Realigns every session and returns the reconciled context.
    pub async fn sync_pulse(&self, state: &SharedKernelState) -> String {
        self.pulse(state).await.reconciled
    }

    /// Runs one pulse under the kernel lock.
    ///
    /// Active sessions are suspended, the hook reconciles shared context,
    /// then every TCB is reset to zero drift and `Active` with no pending
    /// tool, and global drift is zeroed. Running it twice in a row is the
    /// same as running it once.
    pub async fn pulse(&self, state: &SharedKernelState) -> SyncReport {
        let mut state = state.lock().await;

        for tcb in state.tcbs_mut() {
            if tcb.status == TcbStatus::Active {
                tcb.status = TcbStatus::Suspended;
            }
        }

        let snapshot = state.snapshot();
        let reconciled = self.hook.reconcile(&snapshot).await;

        for tcb in state.tcbs_mut() {
            tcb.drift = 0.0;
            tcb.status = TcbStatus::Active;
            tcb.active_tool = None;
        }
        let drift_cleared = state.global_drift();
        state.reset_global_drift();

        let pulse = self.pulses.fetch_add(1, Ordering::Relaxed) + 1;
        let report = SyncReport {
            reconciled,
            tcbs: snapshot.len(),
            drift_cleared,
            pulse,
        };
        tracing::info!(
            pulse,
            tcbs = report.tcbs,
            drift_cleared,
            "sync pulse complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::kernel::{Kernel, KernelSettings, KernelState};
    use crate::providers::ScriptedProvider;

    fn tcb(priority: i32, seq: u64) -> TaskControlBlock {
        TaskControlBlock::new(format!("s{seq}"), "q", priority, TcbStatus::Active, seq)
    }

    fn priorities(tcbs: &[TaskControlBlock]) -> Vec<i32> {
        tcbs.iter().map(|t| t.priority).collect()
    }

    #[test]
    fn test_schedule_orders_by_priority_descending() {
        let scheduler = CognitiveScheduler::new(0.5);
        let input = vec![tcb(3, 1), tcb(1, 2), tcb(2, 3)];

        let ordered = scheduler.schedule(&input);

        assert_eq!(priorities(&ordered), vec![3, 2, 1]);
        assert_eq!(priorities(&input), vec![3, 1, 2]);
    }

    #[test]
    fn test_schedule_ties_keep_creation_order() {
        let scheduler = CognitiveScheduler::new(0.5);
        let ordered = scheduler.schedule(&[tcb(1, 4), tcb(2, 9), tcb(1, 2), tcb(2, 3)]);
        let seqs: Vec<_> = ordered.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![3, 9, 2, 4]);
    }

    async fn drifted_kernel() -> Kernel {
        let kernel = Kernel::new(
            KernelState::shared(),
            Arc::new(ScriptedProvider::repeating(
                r#"<tool_call>{"name":"echo","arguments":{}}</tool_call>"#,
            )),
            KernelSettings::default(),
        );
        for _ in 0..3 {
            kernel.execute("a", "q", "").await.unwrap();
        }
        kernel.execute("b", "q", "").await.unwrap();
        kernel
    }

    #[tokio::test]
    async fn test_pulse_resets_drift_and_status() {
        let kernel = drifted_kernel().await;
        let scheduler = CognitiveScheduler::new(0.5);

        let reconciled = scheduler.sync_pulse(kernel.state()).await;

        assert_eq!(reconciled, DEFAULT_SYNC_CONTEXT);
        for tcb in kernel.snapshot().await {
            assert_eq!(tcb.drift, 0.0);
            assert_eq!(tcb.status, TcbStatus::Active);
            assert_eq!(tcb.active_tool, None);
        }
        assert_eq!(kernel.global_drift().await, 0.0);
        assert_eq!(scheduler.pulses(), 1);
    }

    #[tokio::test]
    async fn test_pulse_is_idempotent() {
        let kernel = drifted_kernel().await;
        let scheduler = CognitiveScheduler::new(0.5);

        let first = scheduler.sync_pulse(kernel.state()).await;
        let after_first = kernel.snapshot().await;
        let second = scheduler.pulse(kernel.state()).await;

        assert_eq!(first, second.reconciled);
        assert_eq!(second.drift_cleared, 0.0);
        assert_eq!(kernel.snapshot().await, after_first);
    }

    #[tokio::test]
    async fn test_pulse_on_empty_state() {
        let state = KernelState::shared();
        let report = CognitiveScheduler::new(0.5).pulse(&state).await;
        assert_eq!(report.tcbs, 0);
        assert_eq!(report.reconciled, DEFAULT_SYNC_CONTEXT);
    }

    struct RecordingHook {
        seen: Mutex<Vec<TcbStatus>>,
    }

    impl SyncHook for RecordingHook {
        fn reconcile<'a>(&'a self, tcbs: &'a [TaskControlBlock]) -> SyncFuture<'a> {
            let statuses = tcbs.iter().map(|t| t.status).collect();
            *self.seen.lock().unwrap() = statuses;
            Box::pin(async move { format!("reconciled {} sessions", tcbs.len()) })
        }
    }

    #[tokio::test]
    async fn test_hook_sees_suspended_sessions() {
        let state = KernelState::shared();
        let kernel = Kernel::new(
            Arc::clone(&state),
            Arc::new(ScriptedProvider::new([
                "plain",
                r#"<tool_call>{"name":"echo","arguments":{}}</tool_call>"#,
            ])),
            KernelSettings::default(),
        );
        kernel.execute("active", "q", "").await.unwrap();
        kernel.execute("interrupted", "q", "").await.unwrap();

        let hook = Arc::new(RecordingHook {
            seen: Mutex::new(Vec::new()),
        });
        let scheduler =
            CognitiveScheduler::with_hook(0.5, Arc::clone(&hook) as Arc<dyn SyncHook>);

        assert_eq!(scheduler.sync_pulse(&state).await, "reconciled 2 sessions");
        assert_eq!(
            *hook.seen.lock().unwrap(),
            vec![TcbStatus::Suspended, TcbStatus::Interrupt]
        );
    }

    #[tokio::test]
    async fn test_needs_sync_follows_threshold() {
        let kernel = Kernel::new(
            KernelState::shared(),
            Arc::new(ScriptedProvider::repeating("plain")),
            KernelSettings::default(),
        );
        let scheduler = CognitiveScheduler::new(0.1);

        kernel.execute("a", "q", "").await.unwrap();
        assert!(!scheduler.needs_sync(kernel.state()).await);
        kernel.execute("b", "q", "").await.unwrap();
        assert!(scheduler.needs_sync(kernel.state()).await);
    }
}
