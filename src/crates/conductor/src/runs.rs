//! Run records, the per-thread queue and the multitasking policies.
//!
//! Each thread has a single-slot active run plus an ordered waiter queue.
//! Submitting a run against a busy thread consults the
//! [`MultitaskStrategy`]: `reject` fails with a conflict, `enqueue`
//! appends a waiter, `interrupt` cooperatively cancels the active run and
//! takes its place, `rollback` additionally deletes the superseded run
//! and every checkpoint it produced.
//!
//! Run events are buffered per run (and simultaneously broadcast), so a
//! subscriber joining mid-run replays the full ordered sequence before
//! switching to live events - ordering guarantees survive late joins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_core::{Command, StreamMode};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Lifecycle states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, waiting for its turn (or its `after_seconds` delay).
    Pending,
    /// Executing.
    Running,
    /// Finished normally.
    Success,
    /// Failed.
    Error,
    /// Exceeded its wall-clock timeout.
    Timeout,
    /// Paused at an interrupt point, or superseded by another run.
    Interrupted,
}

impl RunStatus {
    /// Has the run reached a final state?
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

/// Policy applied when a run is submitted against a busy thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultitaskStrategy {
    /// Fail creation with a conflict error.
    #[default]
    Reject,
    /// Wait for the active run to finish.
    Enqueue,
    /// Cancel the active run at its next cooperative point, mark it
    /// interrupted, start from the current checkpoint.
    Interrupt,
    /// Cancel the active run, delete it and the checkpoints it produced,
    /// then start from the rewound state.
    Rollback,
}

/// Per-run configuration subtree (`config` in the HTTP payload).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunConfigPayload {
    /// Key/values surfaced to nodes through their context.
    #[serde(default)]
    pub configurable: HashMap<String, Value>,
    /// Superstep budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<usize>,
}

/// Everything a caller can set when submitting a run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunPayload {
    /// Initial input values; `None` resumes from the latest checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Control command (state update / resume value); takes precedence
    /// over `input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    /// Stream modes to emit; defaults to `values`.
    #[serde(default)]
    pub stream_mode: Vec<StreamMode>,
    /// Include namespaced subgraph events.
    #[serde(default)]
    pub stream_subgraphs: bool,
    /// Pause before these nodes (`"*"` for all).
    #[serde(default)]
    pub interrupt_before: Vec<String>,
    /// Pause after these nodes.
    #[serde(default)]
    pub interrupt_after: Vec<String>,
    /// Configuration subtree.
    #[serde(default)]
    pub config: RunConfigPayload,
    /// Fork from this historical checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// Policy against an already-active run on the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multitask_strategy: Option<MultitaskStrategy>,
    /// Delay before the run becomes eligible to start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_seconds: Option<u64>,
    /// Wall-clock budget; expiry cancels the run with a timeout status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// URL invoked with the final run status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

impl RunPayload {
    /// Requested stream modes, defaulting to `values`.
    pub fn stream_modes(&self) -> Vec<StreamMode> {
        if self.stream_mode.is_empty() {
            vec![StreamMode::Values]
        } else {
            self.stream_mode.clone()
        }
    }
}

/// The serializable face of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Run id.
    pub run_id: String,
    /// Owning thread.
    pub thread_id: String,
    /// Assistant whose graph executes.
    pub assistant_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Effective multitask strategy.
    pub multitask_strategy: MultitaskStrategy,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

/// One event on a run's wire: an SSE-ready chunk or the end marker.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A stream chunk, already carrying its wire event name.
    Chunk {
        /// SSE event name (`values`, `updates|ns…`, …).
        event: String,
        /// JSON payload.
        data: Value,
    },
    /// Terminal marker; the stream closes after this.
    Done(RunStatus),
}

/// Why a run's cancellation token fired.
#[derive(Debug, Clone, Copy)]
pub struct CancelReason {
    /// Delete the run and rewind its checkpoints.
    pub rollback: bool,
}

struct EventLog {
    history: Vec<RunEvent>,
    tx: broadcast::Sender<RunEvent>,
}

/// A live run: record, event log and cancellation plumbing.
pub struct Run {
    /// Mutable record behind a lock.
    record: Mutex<RunRecord>,
    /// The submitted payload.
    pub payload: RunPayload,
    /// Cooperative cancellation token handed to the engine.
    pub cancel: CancellationToken,
    /// Why the token fired, when it did.
    pub cancel_reason: Mutex<Option<CancelReason>>,
    /// Latest root checkpoint id when the run started; the rollback
    /// boundary.
    pub starting_checkpoint: Mutex<Option<String>>,
    events: Mutex<EventLog>,
    output: Mutex<Option<Value>>,
    done_tx: watch::Sender<Option<RunStatus>>,
    done_rx: watch::Receiver<Option<RunStatus>>,
}

impl Run {
    /// Create a pending run.
    pub fn new(
        thread_id: &str,
        assistant_id: &str,
        strategy: MultitaskStrategy,
        payload: RunPayload,
    ) -> Arc<Self> {
        let now = Utc::now();
        let (done_tx, done_rx) = watch::channel(None);
        let (tx, _) = broadcast::channel(256);
        Arc::new(Self {
            record: Mutex::new(RunRecord {
                run_id: uuid::Uuid::new_v4().to_string(),
                thread_id: thread_id.to_string(),
                assistant_id: assistant_id.to_string(),
                status: RunStatus::Pending,
                multitask_strategy: strategy,
                created_at: now,
                updated_at: now,
            }),
            payload,
            cancel: CancellationToken::new(),
            cancel_reason: Mutex::new(None),
            starting_checkpoint: Mutex::new(None),
            events: Mutex::new(EventLog {
                history: Vec::new(),
                tx,
            }),
            output: Mutex::new(None),
            done_tx,
            done_rx,
        })
    }

    /// The run id.
    pub fn id(&self) -> String {
        self.record.lock().run_id.clone()
    }

    /// Snapshot of the record.
    pub fn record(&self) -> RunRecord {
        self.record.lock().clone()
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.record.lock().status
    }

    /// Transition the status.
    pub fn set_status(&self, status: RunStatus) {
        let mut record = self.record.lock();
        record.status = status;
        record.updated_at = Utc::now();
    }

    /// Final output values, once finished.
    pub fn output(&self) -> Option<Value> {
        self.output.lock().clone()
    }

    /// Append an event to the log and fan it out to live subscribers.
    pub fn publish(&self, event: RunEvent) {
        let mut log = self.events.lock();
        log.history.push(event.clone());
        let _ = log.tx.send(event);
    }

    /// Replay-then-live subscription: the returned history and receiver
    /// are gap-free because both are taken under the log lock.
    pub fn subscribe(&self) -> (Vec<RunEvent>, broadcast::Receiver<RunEvent>) {
        let log = self.events.lock();
        (log.history.clone(), log.tx.subscribe())
    }

    /// Mark the run finished: records the output, publishes the end
    /// marker and releases joiners.
    pub fn finish(&self, status: RunStatus, output: Option<Value>) {
        self.set_status(status);
        *self.output.lock() = output;
        self.publish(RunEvent::Done(status));
        let _ = self.done_tx.send(Some(status));
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.done_rx.clone();
        loop {
            if let Some(status) = *rx.borrow() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }
}

#[derive(Default)]
struct ThreadQueue {
    active: Option<String>,
    waiters: VecDeque<String>,
}

/// Outcome of submitting a run to its thread queue.
pub enum Admission {
    /// The slot was free; start the run now.
    StartNow,
    /// The run waits behind the active one.
    Queued,
    /// The run was placed first in line and the named active run must be
    /// cancelled.
    Supersede {
        /// The run to cancel.
        active_run_id: String,
    },
    /// Policy `reject` with a busy thread.
    Rejected,
}

/// Registry of runs and per-thread queues.
#[derive(Default)]
pub struct RunManager {
    runs: DashMap<String, Arc<Run>>,
    queues: DashMap<String, Mutex<ThreadQueue>>,
}

impl RunManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run.
    pub fn insert(&self, run: Arc<Run>) {
        self.runs.insert(run.id(), run);
    }

    /// Remove a run entirely (rollback).
    pub fn remove(&self, run_id: &str) -> Option<Arc<Run>> {
        self.runs.remove(run_id).map(|(_, run)| run)
    }

    /// Fetch a run.
    pub fn get(&self, run_id: &str) -> Option<Arc<Run>> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    /// Runs of one thread, newest first, optionally filtered by status.
    pub fn list_for_thread(&self, thread_id: &str, status: Option<RunStatus>) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self
            .runs
            .iter()
            .map(|entry| entry.record())
            .filter(|record| record.thread_id == thread_id)
            .filter(|record| status.map_or(true, |s| record.status == s))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Admit a run to its thread queue under the given strategy.
    pub fn admit(
        &self,
        thread_id: &str,
        run_id: &str,
        strategy: MultitaskStrategy,
    ) -> Admission {
        let queue = self
            .queues
            .entry(thread_id.to_string())
            .or_default();
        let mut state = queue.lock();
        match &state.active {
            None => {
                state.active = Some(run_id.to_string());
                Admission::StartNow
            }
            Some(active_run_id) => {
                let active_run_id = active_run_id.clone();
                match strategy {
                    MultitaskStrategy::Reject => Admission::Rejected,
                    MultitaskStrategy::Enqueue => {
                        state.waiters.push_back(run_id.to_string());
                        Admission::Queued
                    }
                    MultitaskStrategy::Interrupt | MultitaskStrategy::Rollback => {
                        state.waiters.push_front(run_id.to_string());
                        Admission::Supersede { active_run_id }
                    }
                }
            }
        }
    }

    /// Release the active slot after a run settles; returns the next
    /// waiter to start, already promoted to active.
    pub fn release(&self, thread_id: &str, run_id: &str) -> Option<String> {
        let queue = self.queues.get(thread_id)?;
        let mut state = queue.lock();
        if state.active.as_deref() == Some(run_id) {
            state.active = state.waiters.pop_front();
            state.active.clone()
        } else {
            None
        }
    }

    /// Remove a pending run from its thread's waiter queue. Returns
    /// whether it was waiting.
    pub fn withdraw(&self, thread_id: &str, run_id: &str) -> bool {
        let Some(queue) = self.queues.get(thread_id) else {
            return false;
        };
        let mut state = queue.lock();
        let before = state.waiters.len();
        state.waiters.retain(|id| id != run_id);
        state.waiters.len() != before
    }

    /// Is this run the thread's active run?
    pub fn is_active(&self, thread_id: &str, run_id: &str) -> bool {
        self.queues
            .get(thread_id)
            .map(|queue| queue.lock().active.as_deref() == Some(run_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_run(thread: &str) -> Arc<Run> {
        Run::new(thread, "agent", MultitaskStrategy::Reject, RunPayload::default())
    }

    #[test]
    fn admission_fills_the_slot_then_queues() {
        let manager = RunManager::new();
        let a = pending_run("t");
        let b = pending_run("t");
        manager.insert(a.clone());
        manager.insert(b.clone());

        assert!(matches!(
            manager.admit("t", &a.id(), MultitaskStrategy::Enqueue),
            Admission::StartNow
        ));
        assert!(matches!(
            manager.admit("t", &b.id(), MultitaskStrategy::Enqueue),
            Admission::Queued
        ));
        assert!(manager.is_active("t", &a.id()));

        let next = manager.release("t", &a.id());
        assert_eq!(next.as_deref(), Some(b.id().as_str()));
        assert!(manager.is_active("t", &b.id()));
    }

    #[test]
    fn reject_policy_rejects_when_busy() {
        let manager = RunManager::new();
        let a = pending_run("t");
        let b = pending_run("t");
        manager.admit("t", &a.id(), MultitaskStrategy::Reject);
        assert!(matches!(
            manager.admit("t", &b.id(), MultitaskStrategy::Reject),
            Admission::Rejected
        ));
    }

    #[test]
    fn supersede_jumps_the_queue() {
        let manager = RunManager::new();
        let a = pending_run("t");
        let b = pending_run("t");
        let c = pending_run("t");
        manager.admit("t", &a.id(), MultitaskStrategy::Enqueue);
        manager.admit("t", &b.id(), MultitaskStrategy::Enqueue);

        match manager.admit("t", &c.id(), MultitaskStrategy::Interrupt) {
            Admission::Supersede { active_run_id } => assert_eq!(active_run_id, a.id()),
            _ => panic!("expected supersede"),
        }
        // The superseding run starts before the earlier waiter.
        assert_eq!(manager.release("t", &a.id()).as_deref(), Some(c.id().as_str()));
    }

    #[tokio::test]
    async fn subscribers_replay_history_without_gaps() {
        let run = pending_run("t");
        run.publish(RunEvent::Chunk {
            event: "metadata".into(),
            data: serde_json::json!({"run": 1}),
        });
        let (history, mut live) = run.subscribe();
        assert_eq!(history.len(), 1);

        run.publish(RunEvent::Done(RunStatus::Success));
        match live.recv().await.unwrap() {
            RunEvent::Done(status) => assert_eq!(status, RunStatus::Success),
            _ => panic!("expected done marker"),
        }
    }

    #[tokio::test]
    async fn wait_resolves_on_finish() {
        let run = pending_run("t");
        let waiter = run.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        run.finish(RunStatus::Success, Some(serde_json::json!({"ok": true})));
        assert_eq!(handle.await.unwrap(), RunStatus::Success);
        assert_eq!(run.output(), Some(serde_json::json!({"ok": true})));
    }
}
