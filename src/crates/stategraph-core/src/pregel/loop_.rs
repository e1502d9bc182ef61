//! The superstep driver.
//!
//! One [`PregelLoop`] owns one run: it loads (or creates) the thread's
//! checkpoint, applies the input, then cycles plan → execute → commit
//! until nothing is left to do. Persisted checkpoints make every step
//! boundary a durable suspension point; pending writes persisted at task
//! settlement make the *inside* of a step recoverable too - a resumed run
//! replays recorded writes instead of re-invoking tasks that already
//! succeeded.
//!
//! Cancellation is cooperative: the token is checked between supersteps
//! and after each task settlement. In-flight node futures are dropped at
//! their next await point and their writes are never persisted.

use crate::command::{Command, GotoTarget};
use crate::config::{GraphInput, RunConfig};
use crate::error::{GraphError, Result};
use crate::graph::compiled::{CompiledGraph, GraphCore, NodeRunner, NodeSpec};
use crate::graph::RouterResult;
use crate::interrupt::{Interrupt, InterruptNodes, InterruptWhen};
use crate::node::{NodeContext, NodeError, NodeOutput};
use crate::pregel::io;
use crate::pregel::task::{ExecutableTask, TaskWrites};
use crate::pregel::algo;
use crate::send::Send as SendPacket;
use crate::stream::{EventSender, StreamEvent};
use crate::types::{
    self, END, ERROR_CHANNEL, INTERRUPT_CHANNEL, NO_WRITES_CHANNEL, SEND_CHANNEL, START,
};
use futures::StreamExt;
use serde_json::{json, Value};
use stategraph_checkpoint::{
    ChannelVersion, Channel, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
    CheckpointSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// No tasks left and no pending sends: the run is complete.
    Done,
    /// The run paused at an interrupt point and can be resumed.
    Interrupted,
}

/// What a finished (or paused) run hands back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// State channel values at the stop point.
    pub values: Value,
    /// Completion status.
    pub status: LoopStatus,
    /// Interrupt records, when the run paused on dynamic interrupts.
    pub interrupts: Vec<Interrupt>,
    /// Names of the tasks that would run next (empty when done).
    pub next: Vec<String>,
}

/// How one task settled.
enum Settled {
    Completed {
        task: ExecutableTask,
        writes: TaskWrites,
    },
    Interrupted {
        task: ExecutableTask,
        interrupt: Interrupt,
    },
    Failed {
        task: ExecutableTask,
        message: String,
    },
}

/// One run of one graph.
pub struct PregelLoop {
    graph: CompiledGraph,
    config: RunConfig,
    emitter: Option<EventSender>,
}

impl PregelLoop {
    /// Prepare a run; nothing happens until [`PregelLoop::run`].
    pub fn new(graph: CompiledGraph, config: RunConfig, emitter: Option<EventSender>) -> Self {
        Self {
            graph,
            config,
            emitter,
        }
    }

    async fn emit(&self, event: StreamEvent) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event).await;
        }
    }

    fn next_version_fn(&self) -> impl Fn(Option<&ChannelVersion>) -> ChannelVersion + '_ {
        let saver = self.graph.saver().cloned();
        move |current| match &saver {
            Some(saver) => saver.next_version(current, ""),
            None => match current {
                None => ChannelVersion::Int(1),
                Some(ChannelVersion::Int(n)) => ChannelVersion::Int(n + 1),
                Some(ChannelVersion::Str(s)) => ChannelVersion::Str(format!("{s}0")),
            },
        }
    }

    /// Effective interrupt settings: the run config overrides the
    /// compiled-in defaults when set.
    fn effective_interrupts(&self) -> (InterruptNodes, InterruptNodes) {
        let before = if self.config.interrupt_before.is_never() {
            self.graph.interrupt_before().clone()
        } else {
            self.config.interrupt_before.clone()
        };
        let after = if self.config.interrupt_after.is_never() {
            self.graph.interrupt_after().clone()
        } else {
            self.config.interrupt_after.clone()
        };
        (before, after)
    }

    /// Drive the run to completion, interruption or failure.
    pub async fn run(self, input: GraphInput) -> Result<RunOutcome> {
        let graph = self.graph.clone();
        let core = graph.core().clone();
        let saver = graph.saver().cloned();
        let cancel = self.config.cancellation.clone();
        let state_keys = core.state_channel_names();
        let (interrupt_before, interrupt_after) = self.effective_interrupts();

        if saver.is_some() && self.config.thread_id.is_none() {
            return Err(GraphError::InvalidInput(
                "a thread_id is required when a checkpointer is attached".into(),
            ));
        }

        // -- Load ---------------------------------------------------------
        let mut ckpt_config = CheckpointConfig {
            thread_id: self.config.thread_id.clone(),
            checkpoint_ns: self.config.checkpoint_ns.clone(),
            checkpoint_id: self.config.checkpoint_id.clone(),
            checkpoint_map: self.config.checkpoint_map.clone(),
        };
        let mut channels = core.build_channels();
        let mut checkpoint = Checkpoint::empty();
        let mut prev_step: i64 = -2;
        let mut pending: HashMap<String, Vec<(String, Value)>> = HashMap::new();

        if let Some(saver) = &saver {
            if let Some(tuple) = saver.get_tuple(&ckpt_config).await? {
                io::restore_channels(&mut channels, &tuple.checkpoint.channel_values)?;
                prev_step = tuple.metadata.step.unwrap_or(-1);
                for write in &tuple.pending_writes {
                    pending
                        .entry(write.task_id.clone())
                        .or_default()
                        .push((write.channel.clone(), write.value.clone()));
                }
                ckpt_config = tuple.config.clone();
                checkpoint = tuple.checkpoint;
            } else if self.config.checkpoint_id.is_some() {
                return Err(GraphError::InvalidInput(format!(
                    "checkpoint {:?} not found",
                    self.config.checkpoint_id
                )));
            } else {
                ckpt_config.checkpoint_id = None;
            }
        }
        let had_checkpoint = prev_step > -2;

        // -- Interpret input ---------------------------------------------
        let mut resume_for: HashMap<String, Value> = HashMap::new();
        let mut resume_single: Option<Value> = None;
        let mut input_writes: Option<(Vec<(String, Value)>, CheckpointSource)> = None;
        let resuming = match input {
            GraphInput::Values(values) => {
                let mut writes = io::decompose_update(&values, &core)?;
                writes.push((START.to_string(), Value::Null));
                input_writes = Some((writes, CheckpointSource::Input));
                false
            }
            GraphInput::Command(command) => {
                if let Some(update) = &command.update {
                    let writes = io::decompose_update(update, &core)?;
                    input_writes = Some((writes, CheckpointSource::Update));
                }
                resume_single = command.resume.clone();
                resume_for = command.resume_map.clone();
                true
            }
            GraphInput::Resume => true,
        };
        if resuming && !had_checkpoint {
            return Err(GraphError::InvalidInput(
                "received no input and there is no checkpoint to resume".into(),
            ));
        }

        // A bare resume value targets the single interrupted task.
        if let Some(single) = resume_single {
            let interrupted: Vec<&String> = pending
                .iter()
                .filter(|(_, writes)| writes.iter().any(|(c, _)| c == INTERRUPT_CHANNEL))
                .map(|(task_id, _)| task_id)
                .collect();
            if let [only] = interrupted.as_slice() {
                resume_for.entry((*only).clone()).or_insert(single);
            } else if interrupted.is_empty() {
                tracing::warn!("resume value supplied but no task is interrupted");
            } else {
                tracing::warn!(
                    count = interrupted.len(),
                    "bare resume value is ambiguous with several interrupted tasks; use a resume map"
                );
            }
        }

        // -- Open the stream ---------------------------------------------
        let mut metadata = serde_json::Map::new();
        if let Some(thread_id) = &self.config.thread_id {
            metadata.insert("thread_id".into(), json!(thread_id));
        }
        if !self.config.checkpoint_ns.is_empty() {
            metadata.insert("checkpoint_ns".into(), json!(&self.config.checkpoint_ns));
        }
        for (key, value) in &self.config.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        self.emit(StreamEvent::Metadata {
            metadata: Value::Object(metadata),
        })
        .await;

        // -- Apply input as writes (step `prev → prev + 1`) ---------------
        if let Some((writes, source)) = input_writes {
            let seed = TaskWrites {
                name: START.to_string(),
                path: types::TaskPath::Pull {
                    node: START.to_string(),
                },
                triggers: Vec::new(),
                writes,
                sends: Vec::new(),
            };
            let bump = self.next_version_fn();
            algo::apply_writes(
                &mut checkpoint,
                &mut channels,
                &[seed],
                &bump,
                &core.consume_channels,
            )?;
            let step = prev_step + 1;
            self.commit(
                &saver,
                &mut ckpt_config,
                &mut checkpoint,
                &channels,
                source,
                step,
            )
            .await?;
            prev_step = step;
            // Fresh input invalidates writes recorded against the old
            // checkpoint position.
            pending.clear();
            self.emit(StreamEvent::Values {
                values: io::read_state(&channels, &state_keys),
            })
            .await;
        }

        // -- Supersteps ---------------------------------------------------
        let mut steps_executed: usize = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            let step = prev_step + 1;
            let tasks = algo::prepare_next_tasks(&checkpoint, &core, &channels, step)?;
            if tasks.is_empty() {
                break;
            }
            if steps_executed >= self.config.recursion_limit {
                return Err(GraphError::Recursion {
                    limit: self.config.recursion_limit,
                });
            }

            // Interrupt-before: pause with the planned tasks as `next`.
            // Skipped on the first step of a resumed run, which exists to
            // get past exactly this pause.
            let first_resumed_step = resuming && steps_executed == 0;
            if !first_resumed_step && tasks.iter().any(|t| interrupt_before.matches(&t.name)) {
                return Ok(RunOutcome {
                    values: io::read_state(&channels, &state_keys),
                    status: LoopStatus::Interrupted,
                    interrupts: Vec::new(),
                    next: tasks.into_iter().map(|t| t.name).collect(),
                });
            }

            // Concurrent subgraph invocations of one node would collide on
            // their nested namespace.
            if saver.is_some() {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for task in &tasks {
                    if core.nodes[&task.name].is_subgraph() {
                        *counts.entry(task.name.as_str()).or_default() += 1;
                    }
                }
                if let Some((node, _)) = counts.iter().find(|(_, count)| **count > 1) {
                    return Err(GraphError::MultipleSubgraphs {
                        node: node.to_string(),
                    });
                }
            }

            let task_names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
            let phase = self
                .execute_step(
                    &core,
                    &saver,
                    &ckpt_config,
                    &checkpoint,
                    &channels,
                    tasks,
                    &pending,
                    &resume_for,
                    step,
                )
                .await?;

            if !phase.interrupts.is_empty() {
                // The step does not commit: a later run replans it, replays
                // the completed siblings and re-executes the interrupted
                // tasks with resume values.
                self.emit(StreamEvent::Updates {
                    updates: json!({ INTERRUPT_CHANNEL: &phase.interrupts }),
                })
                .await;
                return Ok(RunOutcome {
                    values: io::read_state(&channels, &state_keys),
                    status: LoopStatus::Interrupted,
                    interrupts: phase.interrupts,
                    next: task_names,
                });
            }
            if let Some((node, message)) = phase.failures.into_iter().next() {
                return Err(GraphError::NodeFailed { node, message });
            }

            // Per-task stream output, then the commit.
            for writes in &phase.completed {
                self.emit_message_events(writes, step).await;
            }
            for writes in &phase.completed {
                let mut update = serde_json::Map::new();
                update.insert(writes.name.clone(), writes.update_object());
                self.emit(StreamEvent::Updates {
                    updates: Value::Object(update),
                })
                .await;
            }

            let bump = self.next_version_fn();
            algo::apply_writes(
                &mut checkpoint,
                &mut channels,
                &phase.completed,
                &bump,
                &core.consume_channels,
            )?;
            self.commit(
                &saver,
                &mut ckpt_config,
                &mut checkpoint,
                &channels,
                CheckpointSource::Loop,
                step,
            )
            .await?;
            self.emit(StreamEvent::Values {
                values: io::read_state(&channels, &state_keys),
            })
            .await;

            prev_step = step;
            steps_executed += 1;
            pending.clear();

            // Interrupt-after: the step is committed, then the run pauses.
            // A pause with nothing left to run would be unresumable, so a
            // match on the final step falls through to normal completion.
            if phase
                .executed_names
                .iter()
                .any(|name| interrupt_after.matches(name))
            {
                let upcoming =
                    algo::prepare_next_tasks(&checkpoint, &core, &channels, prev_step + 1)?;
                if !upcoming.is_empty() {
                    return Ok(RunOutcome {
                        values: io::read_state(&channels, &state_keys),
                        status: LoopStatus::Interrupted,
                        interrupts: Vec::new(),
                        next: upcoming.into_iter().map(|t| t.name).collect(),
                    });
                }
            }
        }

        Ok(RunOutcome {
            values: io::read_state(&channels, &state_keys),
            status: LoopStatus::Done,
            interrupts: Vec::new(),
            next: Vec::new(),
        })
    }

    /// Execute one planned step: replay recorded writes, run the rest
    /// concurrently, persist every settlement as pending writes.
    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        core: &Arc<GraphCore>,
        saver: &Option<Arc<dyn CheckpointSaver>>,
        ckpt_config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        channels: &HashMap<String, Box<dyn Channel>>,
        tasks: Vec<ExecutableTask>,
        pending: &HashMap<String, Vec<(String, Value)>>,
        resume_for: &HashMap<String, Value>,
        step: i64,
    ) -> Result<StepPhase> {
        let mut phase = StepPhase::default();
        let mut to_run = Vec::new();

        for task in tasks {
            phase.executed_names.push(task.name.clone());
            match classify_recorded(pending.get(&task.id)) {
                Recorded::Completed { writes, sends } => {
                    self.emit(StreamEvent::Debug {
                        payload: json!({
                            "type": "task_replay",
                            "task_id": &task.id,
                            "node": &task.name,
                            "step": step,
                        }),
                    })
                    .await;
                    phase.completed.push(TaskWrites {
                        name: task.name.clone(),
                        path: task.path.clone(),
                        triggers: task.triggers.clone(),
                        writes,
                        sends,
                    });
                }
                // Errored and interrupted tasks re-execute; never-ran
                // tasks execute for the first time.
                Recorded::Errored | Recorded::Interrupted | Recorded::Absent => {
                    to_run.push(task);
                }
            }
        }

        let cancel = self.config.cancellation.clone();
        let futures = to_run.into_iter().map(|task| {
            let resume = resume_for.get(&task.id).cloned();
            self.run_one_task(core, channels, checkpoint, task, resume, step)
        });
        let mut settled = futures::stream::iter(futures).buffer_unordered(self.config.max_concurrency);

        while let Some(result) = settled.next().await {
            let outcome = result?;
            match outcome {
                Settled::Completed { task, writes } => {
                    let mut entries = writes.writes.clone();
                    for send in &writes.sends {
                        entries.push((SEND_CHANNEL.to_string(), serde_json::to_value(send)?));
                    }
                    if entries.is_empty() {
                        entries.push((NO_WRITES_CHANNEL.to_string(), Value::Null));
                    }
                    self.persist_writes(saver, ckpt_config, &task.id, entries)
                        .await?;
                    self.emit(StreamEvent::Debug {
                        payload: json!({
                            "type": "task_end",
                            "task_id": &task.id,
                            "node": &task.name,
                            "step": step,
                        }),
                    })
                    .await;
                    self.emit(StreamEvent::Events {
                        event: json!({
                            "event": "node_end",
                            "name": &task.name,
                            "task_id": &task.id,
                            "step": step,
                        }),
                    })
                    .await;
                    phase.completed.push(writes);
                }
                Settled::Interrupted { task, interrupt } => {
                    self.persist_writes(
                        saver,
                        ckpt_config,
                        &task.id,
                        vec![(
                            INTERRUPT_CHANNEL.to_string(),
                            serde_json::to_value(&interrupt)?,
                        )],
                    )
                    .await?;
                    self.emit(StreamEvent::Debug {
                        payload: json!({
                            "type": "task_interrupt",
                            "task_id": &task.id,
                            "node": &task.name,
                            "step": step,
                            "value": &interrupt.value,
                        }),
                    })
                    .await;
                    phase.interrupts.push(interrupt);
                }
                Settled::Failed { task, message } => {
                    self.persist_writes(
                        saver,
                        ckpt_config,
                        &task.id,
                        vec![(ERROR_CHANNEL.to_string(), json!({ "message": &message }))],
                    )
                    .await?;
                    self.emit(StreamEvent::Debug {
                        payload: json!({
                            "type": "task_error",
                            "task_id": &task.id,
                            "node": &task.name,
                            "step": step,
                            "error": &message,
                        }),
                    })
                    .await;
                    phase.failures.push((task.name, message));
                }
            }
            if cancel.is_cancelled() {
                // In-flight futures drop here; their writes were never
                // persisted. Completed settlements stay recorded so an
                // `interrupt`-policy takeover can resume past them.
                return Err(GraphError::Cancelled);
            }
        }

        Ok(phase)
    }

    /// Execute one task: a function node with retries, or a subgraph run
    /// under its nested namespace.
    async fn run_one_task(
        &self,
        core: &Arc<GraphCore>,
        channels: &HashMap<String, Box<dyn Channel>>,
        checkpoint: &Checkpoint,
        task: ExecutableTask,
        resume: Option<Value>,
        step: i64,
    ) -> Result<Settled> {
        let spec = core
            .nodes
            .get(&task.name)
            .ok_or_else(|| GraphError::Validation(format!("unknown node '{}'", task.name)))?;

        self.emit(StreamEvent::Debug {
            payload: json!({
                "type": "task_start",
                "task_id": &task.id,
                "node": &task.name,
                "step": step,
                "path": task.path.to_string(),
            }),
        })
        .await;
        self.emit(StreamEvent::Events {
            event: json!({
                "event": "node_start",
                "name": &task.name,
                "task_id": &task.id,
                "step": step,
            }),
        })
        .await;

        match &spec.runner {
            NodeRunner::Task(node) => {
                let policy = spec
                    .retry
                    .clone()
                    .unwrap_or_else(|| self.graph.retry_policy().clone());
                let ctx = NodeContext::new(
                    task.id.clone(),
                    task.name.clone(),
                    self.config.ns_path.clone(),
                    step,
                    Arc::new(self.config.configurable.clone()),
                    self.graph.store().cloned(),
                    self.emitter.clone(),
                    resume,
                );

                let mut attempt = 1;
                loop {
                    match node.run(task.input.clone(), ctx.clone()).await {
                        Ok(output) => {
                            let writes =
                                build_task_writes(core, spec, &task, output, channels)?;
                            return Ok(Settled::Completed { task, writes });
                        }
                        Err(NodeError::Interrupt(value)) => {
                            let interrupt =
                                Interrupt::during(value, self.config.ns_path.clone());
                            return Ok(Settled::Interrupted { task, interrupt });
                        }
                        Err(NodeError::Failed { message, retryable }) => {
                            if retryable && policy.should_retry(attempt) {
                                let delay = policy.delay(attempt);
                                tracing::warn!(
                                    node = %task.name,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %message,
                                    "task failed, retrying"
                                );
                                tokio::time::sleep(delay).await;
                                attempt += 1;
                                continue;
                            }
                            return Ok(Settled::Failed { task, message });
                        }
                    }
                }
            }
            NodeRunner::Subgraph(child) => {
                self.run_subgraph_task(core, channels, checkpoint, child, task, resume)
                    .await
            }
        }
    }

    /// Run a nested graph for one task.
    async fn run_subgraph_task(
        &self,
        core: &Arc<GraphCore>,
        channels: &HashMap<String, Box<dyn Channel>>,
        checkpoint: &Checkpoint,
        child: &CompiledGraph,
        task: ExecutableTask,
        resume: Option<Value>,
    ) -> Result<Settled> {
        let segment = types::child_segment(&task.name, &task.id);
        let child_ns =
            types::child_namespace(&self.config.checkpoint_ns, &task.name, &task.id);
        let mut child_map = self.config.checkpoint_map.clone();
        child_map.insert(self.config.checkpoint_ns.clone(), checkpoint.id.clone());
        let mut child_path = self.config.ns_path.clone();
        child_path.push(segment.clone());

        let mut child_graph = child.clone();
        if child_graph.saver().is_none() {
            if let Some(saver) = self.graph.saver() {
                child_graph = child_graph.with_checkpointer(saver.clone());
            }
        }
        if child_graph.store().is_none() {
            if let Some(store) = self.graph.store() {
                child_graph = child_graph.with_store(store.clone());
            }
        }

        let child_config = RunConfig {
            thread_id: self.config.thread_id.clone(),
            checkpoint_ns: child_ns.clone(),
            checkpoint_id: None,
            checkpoint_map: child_map,
            ns_path: child_path.clone(),
            recursion_limit: self.config.recursion_limit,
            max_concurrency: self.config.max_concurrency,
            configurable: self.config.configurable.clone(),
            metadata: HashMap::new(),
            interrupt_before: InterruptNodes::Never,
            interrupt_after: InterruptNodes::Never,
            stream_subgraphs: self.config.stream_subgraphs,
            cancellation: self.config.cancellation.child_token(),
        };

        // A checkpoint already sitting in the child namespace means this
        // very task started the child and paused mid-flight: resume it
        // rather than re-applying the input.
        let mut child_input = GraphInput::Values(task.input.clone());
        if let Some(saver) = child_graph.saver() {
            let probe = CheckpointConfig {
                thread_id: self.config.thread_id.clone(),
                checkpoint_ns: child_ns.clone(),
                checkpoint_id: None,
                checkpoint_map: HashMap::new(),
            };
            if saver.get_tuple(&probe).await?.is_some() {
                child_input = match resume {
                    Some(value) => GraphInput::Command(Command::resume(value)),
                    None => GraphInput::Resume,
                };
            }
        }

        let child_emitter = self.emitter.as_ref().map(|e| e.child(segment));
        let outcome = Box::pin(
            PregelLoop::new(child_graph, child_config, child_emitter).run(child_input),
        )
        .await;

        match outcome {
            Ok(out) if out.status == LoopStatus::Done => {
                // Only the state keys shared with the parent flow back up.
                let filtered: serde_json::Map<String, Value> = out
                    .values
                    .as_object()
                    .map(|object| {
                        object
                            .iter()
                            .filter(|(key, _)| {
                                core.channels.iter().any(|(name, _)| name == *key)
                            })
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let writes = build_task_writes(
                    core,
                    &core.nodes[&task.name],
                    &task,
                    NodeOutput::Update(Value::Object(filtered)),
                    channels,
                )?;
                Ok(Settled::Completed { task, writes })
            }
            Ok(out) => {
                let interrupt = out.interrupts.into_iter().next().unwrap_or(Interrupt {
                    value: Value::Null,
                    when: InterruptWhen::Before,
                    resumable: true,
                    ns: child_path,
                });
                Ok(Settled::Interrupted { task, interrupt })
            }
            Err(err) => Ok(Settled::Failed {
                task,
                message: err.to_string(),
            }),
        }
    }

    async fn persist_writes(
        &self,
        saver: &Option<Arc<dyn CheckpointSaver>>,
        ckpt_config: &CheckpointConfig,
        task_id: &str,
        entries: Vec<(String, Value)>,
    ) -> Result<()> {
        if let Some(saver) = saver {
            if ckpt_config.checkpoint_id.is_some() {
                saver.put_writes(ckpt_config, entries, task_id).await?;
            }
        }
        Ok(())
    }

    /// Persist the working checkpoint under a fresh identity. The step is
    /// not complete until the saver returns.
    async fn commit(
        &self,
        saver: &Option<Arc<dyn CheckpointSaver>>,
        ckpt_config: &mut CheckpointConfig,
        checkpoint: &mut Checkpoint,
        channels: &HashMap<String, Box<dyn Channel>>,
        source: CheckpointSource,
        step: i64,
    ) -> Result<()> {
        checkpoint.channel_values = io::snapshot_channels(channels);
        checkpoint.id = Uuid::new_v4().to_string();
        checkpoint.ts = chrono::Utc::now();

        let mut metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_step(step)
            .with_parents(self.config.checkpoint_map.clone());
        for (key, value) in &self.config.metadata {
            metadata.extra.insert(key.clone(), value.clone());
        }

        if let Some(saver) = saver {
            let stored = saver
                .put(
                    ckpt_config,
                    checkpoint.clone(),
                    metadata,
                    checkpoint.channel_versions.clone(),
                )
                .await?;
            *ckpt_config = stored;
        } else {
            ckpt_config.checkpoint_id = Some(checkpoint.id.clone());
        }

        self.emit(StreamEvent::Debug {
            payload: json!({
                "type": "checkpoint",
                "checkpoint_id": &checkpoint.id,
                "step": step,
                "source": source,
            }),
        })
        .await;
        Ok(())
    }

    /// `messages/complete` + `messages/metadata` for writes to the
    /// conventional messages channel.
    async fn emit_message_events(&self, writes: &TaskWrites, step: i64) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        let mut emitted = false;
        for (channel, value) in &writes.writes {
            if channel != "messages" {
                continue;
            }
            let metadata = json!({"node": &writes.name, "step": step});
            match value {
                Value::Array(messages) => {
                    for message in messages {
                        emitter
                            .emit(StreamEvent::MessagesComplete {
                                message: message.clone(),
                                metadata: metadata.clone(),
                            })
                            .await;
                        emitted = true;
                    }
                }
                other => {
                    emitter
                        .emit(StreamEvent::MessagesComplete {
                            message: other.clone(),
                            metadata: metadata.clone(),
                        })
                        .await;
                    emitted = true;
                }
            }
        }
        if emitted {
            emitter
                .emit(StreamEvent::MessagesMetadata {
                    metadata: json!({"node": &writes.name, "step": step}),
                })
                .await;
        }
    }
}

/// Per-step execution results.
#[derive(Default)]
struct StepPhase {
    completed: Vec<TaskWrites>,
    interrupts: Vec<Interrupt>,
    failures: Vec<(String, String)>,
    executed_names: Vec<String>,
}

/// What the pending writes recorded for one task mean.
enum Recorded {
    /// Task succeeded before the step committed; replay these.
    Completed {
        writes: Vec<(String, Value)>,
        sends: Vec<SendPacket>,
    },
    /// Task errored; re-execute.
    Errored,
    /// Task raised an interrupt; re-execute with a resume value.
    Interrupted,
    /// Nothing recorded.
    Absent,
}

fn classify_recorded(entries: Option<&Vec<(String, Value)>>) -> Recorded {
    let Some(entries) = entries else {
        return Recorded::Absent;
    };
    if entries.iter().any(|(channel, _)| channel == ERROR_CHANNEL) {
        return Recorded::Errored;
    }
    if entries
        .iter()
        .any(|(channel, _)| channel == INTERRUPT_CHANNEL)
    {
        return Recorded::Interrupted;
    }
    if entries.is_empty() {
        return Recorded::Absent;
    }
    let mut writes = Vec::new();
    let mut sends = Vec::new();
    for (channel, value) in entries {
        match channel.as_str() {
            SEND_CHANNEL => {
                if let Ok(send) = serde_json::from_value::<SendPacket>(value.clone()) {
                    sends.push(send);
                }
            }
            NO_WRITES_CHANNEL => {}
            _ => writes.push((channel.clone(), value.clone())),
        }
    }
    Recorded::Completed { writes, sends }
}

/// Turn a node's output into the writes its settlement contributes:
/// state updates, successor trigger signals from static edges, command
/// gotos and conditional routers, plus dynamic sends.
fn build_task_writes(
    core: &GraphCore,
    spec: &NodeSpec,
    task: &ExecutableTask,
    output: NodeOutput,
    channels: &HashMap<String, Box<dyn Channel>>,
) -> Result<TaskWrites> {
    let (update_writes, goto) = match output {
        NodeOutput::Update(update) => (io::decompose_update(&update, core)?, Vec::new()),
        NodeOutput::Command(command) => {
            let writes = match &command.update {
                Some(update) => io::decompose_update(update, core)?,
                None => Vec::new(),
            };
            (writes, command.goto)
        }
    };

    let mut writes = update_writes.clone();
    let mut sends = Vec::new();
    let route_to = |node: &str, writes: &mut Vec<(String, Value)>| -> Result<()> {
        if node == END {
            return Ok(());
        }
        if !core.nodes.contains_key(node) {
            return Err(GraphError::InvalidUpdate(format!(
                "route target '{node}' is not a node"
            )));
        }
        writes.push((types::branch_channel(node), Value::Null));
        Ok(())
    };

    for target in &spec.static_targets {
        route_to(target, &mut writes)?;
    }
    for target in goto {
        match target {
            GotoTarget::Node(node) => route_to(&node, &mut writes)?,
            GotoTarget::Send(send) => {
                if !core.nodes.contains_key(&send.node) {
                    return Err(GraphError::InvalidUpdate(format!(
                        "send target '{}' is not a node",
                        send.node
                    )));
                }
                sends.push(send);
            }
        }
    }

    if !spec.routers.is_empty() {
        // Routers see the task's own update applied on top of the state.
        let route_state =
            io::overlay_state(channels, &update_writes, &core.state_channel_names())?;
        for router in &spec.routers {
            match router(&route_state) {
                RouterResult::Node(node) => route_to(&node, &mut writes)?,
                RouterResult::Nodes(nodes) => {
                    for node in nodes {
                        route_to(&node, &mut writes)?;
                    }
                }
                RouterResult::Sends(new_sends) => {
                    for send in new_sends {
                        if !core.nodes.contains_key(&send.node) {
                            return Err(GraphError::InvalidUpdate(format!(
                                "send target '{}' is not a node",
                                send.node
                            )));
                        }
                        sends.push(send);
                    }
                }
                RouterResult::End => {}
            }
        }
    }

    Ok(TaskWrites {
        name: task.name.clone(),
        path: task.path.clone(),
        triggers: task.triggers.clone(),
        writes,
        sends,
    })
}
