//! The conductor service: graphs, threads, runs and their worker loop.
//!
//! This is the layer the HTTP handlers are thin wrappers over. It owns
//! the shared checkpointer and store, resolves assistants to compiled
//! graphs, serializes runs per thread through the [`RunManager`] and
//! drives each admitted run on a background task.

use crate::assistants::AssistantRegistry;
use crate::error::{ConductorError, Result};
use crate::runs::{
    Admission, CancelReason, MultitaskStrategy, Run, RunEvent, RunManager, RunPayload, RunStatus,
};
use crate::threads::{ThreadRegistry, ThreadStatus};
use serde_json::{json, Value};
use stategraph_checkpoint::{CheckpointConfig, CheckpointSaver, ListOptions};
use stategraph_core::{
    CompiledGraph, GraphError, GraphInput, InterruptNodes, LoopStatus, RunConfig, StateSnapshot,
    Store,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared service state. Cheap to clone.
#[derive(Clone)]
pub struct Conductor {
    inner: Arc<ConductorInner>,
}

struct ConductorInner {
    saver: Arc<dyn CheckpointSaver>,
    store: Arc<dyn Store>,
    assistants: AssistantRegistry,
    threads: ThreadRegistry,
    runs: RunManager,
    default_multitask: MultitaskStrategy,
}

impl Conductor {
    /// Create a service over the shared checkpointer and store.
    pub fn new(saver: Arc<dyn CheckpointSaver>, store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(ConductorInner {
                threads: ThreadRegistry::new(saver.clone()),
                saver,
                store,
                assistants: AssistantRegistry::new(),
                runs: RunManager::new(),
                default_multitask: MultitaskStrategy::Reject,
            }),
        }
    }

    /// Override the default multitask strategy applied when a run payload
    /// does not name one.
    pub fn with_default_multitask(self, strategy: MultitaskStrategy) -> Self {
        // Only callable during setup, before the service is shared.
        let mut inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|_| panic!("with_default_multitask after the service was shared"));
        inner.default_multitask = strategy;
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register a graph; the shared checkpointer and store are attached.
    pub fn register_graph(&self, graph_id: impl Into<String>, graph: CompiledGraph) {
        let graph = graph
            .with_checkpointer(self.inner.saver.clone())
            .with_store(self.inner.store.clone());
        self.inner.assistants.register_graph(graph_id, graph);
    }

    /// The assistant registry.
    pub fn assistants(&self) -> &AssistantRegistry {
        &self.inner.assistants
    }

    /// The thread registry.
    pub fn threads(&self) -> &ThreadRegistry {
        &self.inner.threads
    }

    /// The run manager.
    pub fn runs(&self) -> &RunManager {
        &self.inner.runs
    }

    /// The cross-thread store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// The shared checkpointer.
    pub fn saver(&self) -> &Arc<dyn CheckpointSaver> {
        &self.inner.saver
    }

    fn graph_for_thread(&self, thread_id: &str) -> Result<CompiledGraph> {
        let assistant = self.inner.threads.graph_assistant(thread_id)?;
        self.inner.assistants.resolve_graph(&assistant)
    }

    /// Read a thread's state snapshot.
    pub async fn thread_state(
        &self,
        thread_id: &str,
        checkpoint_id: Option<String>,
        subgraphs: bool,
    ) -> Result<StateSnapshot> {
        self.inner.threads.get(thread_id)?;
        let graph = self.graph_for_thread(thread_id)?;
        let mut config = CheckpointConfig::for_thread(thread_id);
        config.checkpoint_id = checkpoint_id;
        graph
            .get_state(&config, subgraphs)
            .await?
            .ok_or_else(|| ConductorError::NotFound(format!("no state for thread '{thread_id}'")))
    }

    /// Update a thread's state outside of a run; returns the address of
    /// the new checkpoint.
    pub async fn update_thread_state(
        &self,
        thread_id: &str,
        values: Value,
        as_node: Option<&str>,
        checkpoint_id: Option<String>,
    ) -> Result<CheckpointConfig> {
        self.inner.threads.get(thread_id)?;
        let graph = self.graph_for_thread(thread_id)?;
        let mut config = CheckpointConfig::for_thread(thread_id);
        config.checkpoint_id = checkpoint_id;
        let stored = graph.update_state(&config, values, as_node).await?;
        self.refresh_thread_status(thread_id, false).await;
        Ok(stored)
    }

    /// Reverse-chronological state history of a thread.
    pub async fn thread_history(
        &self,
        thread_id: &str,
        options: ListOptions,
    ) -> Result<Vec<StateSnapshot>> {
        self.inner.threads.get(thread_id)?;
        let graph = self.graph_for_thread(thread_id)?;
        Ok(graph
            .get_state_history(&CheckpointConfig::for_thread(thread_id), options)
            .await?)
    }

    /// Submit a run. Applies the thread's multitasking policy and starts
    /// the worker when the slot is free.
    pub fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        payload: RunPayload,
    ) -> Result<Arc<Run>> {
        self.inner.threads.get(thread_id)?;
        // Resolve early so an unknown assistant fails the request, not
        // the worker.
        self.inner.assistants.resolve_graph(assistant_id)?;

        let strategy = payload
            .multitask_strategy
            .unwrap_or(self.inner.default_multitask);
        let run = Run::new(thread_id, assistant_id, strategy, payload);
        self.inner.runs.insert(run.clone());
        self.inner.threads.set_last_assistant(thread_id, assistant_id);

        match self.inner.runs.admit(thread_id, &run.id(), strategy) {
            Admission::Rejected => {
                self.inner.runs.remove(&run.id());
                return Err(ConductorError::Conflict(format!(
                    "thread '{thread_id}' already has an active run"
                )));
            }
            Admission::StartNow => self.spawn_worker(run.clone()),
            Admission::Queued => {}
            Admission::Supersede { active_run_id } => {
                if let Some(active) = self.inner.runs.get(&active_run_id) {
                    *active.cancel_reason.lock() = Some(CancelReason {
                        rollback: strategy == MultitaskStrategy::Rollback,
                    });
                    active.cancel.cancel();
                }
            }
        }
        Ok(run)
    }

    /// Cancel a run. `rollback` deletes the run and rewinds its
    /// checkpoints instead of leaving it interrupted.
    pub async fn cancel_run(&self, run_id: &str, rollback: bool) -> Result<()> {
        let run = self
            .inner
            .runs
            .get(run_id)
            .ok_or_else(|| ConductorError::NotFound(format!("run '{run_id}'")))?;
        if run.status().is_terminal() {
            return Ok(());
        }
        let record = run.record();
        // A queued waiter never started; settle it directly.
        if self.inner.runs.withdraw(&record.thread_id, run_id) {
            if rollback {
                run.finish(RunStatus::Interrupted, None);
                self.inner.runs.remove(run_id);
            } else {
                run.finish(RunStatus::Interrupted, None);
            }
            return Ok(());
        }
        *run.cancel_reason.lock() = Some(CancelReason { rollback });
        run.cancel.cancel();
        Ok(())
    }

    /// Delete a thread: cancel anything still running on it, then drop
    /// the record and its checkpoint history.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        for record in self.inner.runs.list_for_thread(thread_id, None) {
            if !record.status.is_terminal() {
                let _ = self.cancel_run(&record.run_id, false).await;
            }
        }
        self.inner.threads.delete(thread_id).await
    }

    /// Wait for a run to finish; returns its terminal status and output.
    pub async fn join_run(&self, run_id: &str) -> Result<(RunStatus, Option<Value>)> {
        let run = self
            .inner
            .runs
            .get(run_id)
            .ok_or_else(|| ConductorError::NotFound(format!("run '{run_id}'")))?;
        let status = run.wait().await;
        Ok((status, run.output()))
    }

    fn spawn_worker(&self, run: Arc<Run>) {
        let service = self.clone();
        tokio::spawn(async move {
            service.drive_run(run).await;
        });
    }

    /// The worker: waits out `after_seconds`, drives the graph stream,
    /// fans events out to subscribers, finalizes status/thread/queue and
    /// fires the webhook.
    async fn drive_run(&self, run: Arc<Run>) {
        let record = run.record();
        let run_id = record.run_id.clone();
        let thread_id = record.thread_id.clone();

        if let Some(seconds) = run.payload.after_seconds {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = run.cancel.cancelled() => {
                    let rollback = run
                        .cancel_reason
                        .lock()
                        .as_ref()
                        .map(|reason| reason.rollback)
                        .unwrap_or(false);
                    if rollback {
                        self.rollback_run(&run).await;
                    } else {
                        self.finalize(&run, RunStatus::Interrupted, None, false).await;
                    }
                    return;
                }
            }
        }

        let graph = match self.inner.assistants.resolve_graph(&record.assistant_id) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "assistant vanished before start");
                self.finalize(&run, RunStatus::Error, None, true).await;
                return;
            }
        };

        run.set_status(RunStatus::Running);
        self.inner.threads.set_status(&thread_id, ThreadStatus::Busy);
        tracing::info!(run_id = %run_id, thread_id = %thread_id, "run started");

        // Rollback boundary: the latest root checkpoint before this run
        // wrote anything.
        let boundary = self
            .inner
            .saver
            .get_tuple(&CheckpointConfig::for_thread(&thread_id))
            .await
            .ok()
            .flatten()
            .and_then(|tuple| tuple.config.checkpoint_id);
        *run.starting_checkpoint.lock() = boundary;

        let payload = &run.payload;
        let mut configurable: HashMap<String, Value> = payload.config.configurable.clone();
        // Assistant-level defaults sit under the run's own values.
        if let Ok(assistant) = self.inner.assistants.latest(&record.assistant_id) {
            if let Some(defaults) = assistant.config.get("configurable").and_then(Value::as_object)
            {
                for (key, value) in defaults {
                    configurable
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        configurable
            .entry("thread_id".to_string())
            .or_insert_with(|| json!(&thread_id));
        let mut config = RunConfig::for_thread(&thread_id)
            .with_stream_subgraphs(payload.stream_subgraphs)
            .with_cancellation(run.cancel.clone())
            .with_interrupt_before(InterruptNodes::from_list(payload.interrupt_before.clone()))
            .with_interrupt_after(InterruptNodes::from_list(payload.interrupt_after.clone()))
            .with_metadata("run_id", json!(&run_id))
            .with_metadata("assistant_id", json!(&record.assistant_id));
        config.checkpoint_id = payload.checkpoint_id.clone();
        config.configurable = configurable;
        if let Some(limit) = payload.config.recursion_limit {
            config.recursion_limit = limit;
        }

        let input = if let Some(command) = &payload.command {
            GraphInput::Command(command.clone())
        } else if let Some(values) = &payload.input {
            GraphInput::Values(values.clone())
        } else {
            GraphInput::Resume
        };

        let deadline = payload
            .timeout_seconds
            .map(|seconds| tokio::time::Instant::now() + Duration::from_secs(seconds));
        let mut timed_out = false;

        let mut stream = graph.stream(input, config, payload.stream_modes());
        loop {
            tokio::select! {
                maybe_chunk = stream.chunks.recv() => match maybe_chunk {
                    Some(chunk) => run.publish(RunEvent::Chunk {
                        event: chunk.wire_event_name(),
                        data: chunk.event.data(),
                    }),
                    None => break,
                },
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if !timed_out => {
                    tracing::warn!(run_id = %run_id, "run exceeded its timeout, cancelling");
                    timed_out = true;
                    run.cancel.cancel();
                }
            }
        }

        let result = match stream.handle.await {
            Ok(result) => result,
            Err(join_err) => Err(GraphError::Validation(format!(
                "run task panicked: {join_err}"
            ))),
        };

        match result {
            Ok(outcome) => {
                let status = match outcome.status {
                    LoopStatus::Done => RunStatus::Success,
                    LoopStatus::Interrupted => RunStatus::Interrupted,
                };
                self.finalize(&run, status, Some(outcome.values), false).await;
            }
            Err(GraphError::Cancelled) => {
                if timed_out {
                    self.finalize(&run, RunStatus::Timeout, None, true).await;
                } else {
                    let rollback = run
                        .cancel_reason
                        .lock()
                        .as_ref()
                        .map(|reason| reason.rollback)
                        .unwrap_or(false);
                    if rollback {
                        self.rollback_run(&run).await;
                    } else {
                        self.finalize(&run, RunStatus::Interrupted, None, false).await;
                    }
                }
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "run failed");
                self.finalize(&run, RunStatus::Error, None, true).await;
            }
        }
    }

    /// Rollback: rewind checkpoints past the run's starting boundary and
    /// delete the run record entirely.
    async fn rollback_run(&self, run: &Arc<Run>) {
        let record = run.record();
        let boundary = run.starting_checkpoint.lock().clone();
        if let Err(err) = self
            .inner
            .saver
            .prune_after(&record.thread_id, boundary.as_deref())
            .await
        {
            tracing::error!(
                run_id = %record.run_id,
                error = %err,
                "rollback failed to prune checkpoints"
            );
        }
        run.finish(RunStatus::Interrupted, None);
        self.inner.runs.remove(&record.run_id);
        self.settle_thread(&record.thread_id, &record.run_id, false)
            .await;
        tracing::info!(run_id = %record.run_id, "run rolled back");
    }

    async fn finalize(
        &self,
        run: &Arc<Run>,
        status: RunStatus,
        output: Option<Value>,
        errored: bool,
    ) {
        let record = run.record();
        run.finish(status, output.clone());
        self.fire_webhook(run, status, output);
        self.settle_thread(&record.thread_id, &record.run_id, errored)
            .await;
        tracing::info!(run_id = %record.run_id, status = ?status, "run settled");
    }

    /// Update thread status from the surviving state and start the next
    /// queued run, if any.
    async fn settle_thread(&self, thread_id: &str, run_id: &str, errored: bool) {
        self.refresh_thread_status(thread_id, errored).await;
        if let Some(next_run_id) = self.inner.runs.release(thread_id, run_id) {
            if let Some(next) = self.inner.runs.get(&next_run_id) {
                self.spawn_worker(next);
            }
        }
    }

    async fn refresh_thread_status(&self, thread_id: &str, errored: bool) {
        let status = if errored {
            ThreadStatus::Error
        } else {
            match self.graph_for_thread(thread_id) {
                Ok(graph) => {
                    let state = graph
                        .get_state(&CheckpointConfig::for_thread(thread_id), false)
                        .await;
                    match state {
                        Ok(Some(snapshot)) if !snapshot.next.is_empty() => {
                            ThreadStatus::Interrupted
                        }
                        _ => ThreadStatus::Idle,
                    }
                }
                Err(_) => ThreadStatus::Idle,
            }
        };
        self.inner.threads.set_status(thread_id, status);
    }

    fn fire_webhook(&self, run: &Arc<Run>, status: RunStatus, output: Option<Value>) {
        let Some(url) = run.payload.webhook.clone() else {
            return;
        };
        let record = run.record();
        let body = json!({
            "run_id": record.run_id,
            "thread_id": record.thread_id,
            "assistant_id": record.assistant_id,
            "status": status,
            "output": output,
        });
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            if let Err(err) = client.post(&url).json(&body).send().await {
                tracing::warn!(url = %url, error = %err, "webhook delivery failed");
            }
        });
    }
}
