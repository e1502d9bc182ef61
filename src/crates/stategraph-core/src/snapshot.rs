//! State snapshots: reading, updating and traversing thread history.
//!
//! A [`StateSnapshot`] is the external view of one checkpoint: the state
//! values, the tasks that would run next (with their interrupts and
//! errors), and the addressing needed to fork from here. With
//! `subgraphs = true`, tasks that wrap subgraphs recursively expose the
//! child's snapshot, giving a tree view of nested execution.

use crate::error::{GraphError, Result};
use crate::graph::compiled::CompiledGraph;
use crate::interrupt::Interrupt;
use crate::pregel::{algo, io};
use crate::pregel::task::TaskWrites;
use crate::types::{self, ERROR_CHANNEL, INTERRUPT_CHANNEL, START, TaskPath};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use stategraph_checkpoint::{
    CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple, ListOptions,
};
use std::collections::HashMap;

/// One task in a snapshot's `next` set.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Deterministic task id.
    pub id: String,
    /// Node name.
    pub name: String,
    /// Pull/Push provenance.
    pub path: TaskPath,
    /// Error recorded for the task, if its last execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Interrupts recorded for the task.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interrupts: Vec<Interrupt>,
    /// The child graph's snapshot, for subgraph tasks when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<StateSnapshot>>,
}

/// External view of one checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    /// State channel values.
    pub values: Value,
    /// Names of the tasks that would run next; empty when the thread is
    /// idle at this checkpoint.
    pub next: Vec<String>,
    /// The tasks behind `next`.
    pub tasks: Vec<TaskSnapshot>,
    /// Checkpoint metadata.
    pub metadata: CheckpointMetadata,
    /// Address of this checkpoint.
    pub config: CheckpointConfig,
    /// Address of the parent checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_config: Option<CheckpointConfig>,
    /// Checkpoint creation time.
    pub created_at: DateTime<Utc>,
}

impl CompiledGraph {
    /// Snapshot the checkpoint addressed by `config` (latest when no
    /// checkpoint id is set). `subgraphs` recursively attaches child
    /// snapshots to subgraph tasks.
    pub async fn get_state(
        &self,
        config: &CheckpointConfig,
        subgraphs: bool,
    ) -> Result<Option<StateSnapshot>> {
        let saver = self
            .saver()
            .ok_or_else(|| GraphError::InvalidInput("no checkpointer attached".into()))?;
        let Some(tuple) = saver.get_tuple(config).await? else {
            return Ok(None);
        };
        Ok(Some(self.snapshot_from_tuple(tuple, subgraphs).await?))
    }

    /// Reverse-chronological snapshots of a thread's history.
    pub async fn get_state_history(
        &self,
        config: &CheckpointConfig,
        options: ListOptions,
    ) -> Result<Vec<StateSnapshot>> {
        let saver = self
            .saver()
            .ok_or_else(|| GraphError::InvalidInput("no checkpointer attached".into()))?;
        let tuples = saver.list(config, options).await?;
        let mut snapshots = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            snapshots.push(self.snapshot_from_tuple(tuple, false).await?);
        }
        Ok(snapshots)
    }

    /// Apply a state update outside of any run, producing a checkpoint
    /// with `source = "update"`. No user node executes. With `as_node`,
    /// the update is attributed to that node and its outgoing edges fire,
    /// so the next run continues from the node's successors.
    pub async fn update_state(
        &self,
        config: &CheckpointConfig,
        values: Value,
        as_node: Option<&str>,
    ) -> Result<CheckpointConfig> {
        let saver = self
            .saver()
            .ok_or_else(|| GraphError::InvalidInput("no checkpointer attached".into()))?
            .clone();
        let core = self.core().clone();

        let mut channels = core.build_channels();
        let tuple = saver.get_tuple(config).await?;
        let (mut checkpoint, mut ckpt_config, prev_step) = match tuple {
            Some(tuple) => {
                io::restore_channels(&mut channels, &tuple.checkpoint.channel_values)?;
                let step = tuple.metadata.step.unwrap_or(-1);
                (tuple.checkpoint, tuple.config, step)
            }
            None => (
                stategraph_checkpoint::Checkpoint::empty(),
                config.clone(),
                -2,
            ),
        };

        let node_name = as_node.unwrap_or(START);
        let mut update_writes = io::decompose_update(&values, &core)?;
        let mut sends = Vec::new();
        if node_name != START {
            let spec = core.nodes.get(node_name).ok_or_else(|| {
                GraphError::InvalidInput(format!("as_node '{node_name}' is not a node"))
            })?;
            for target in &spec.static_targets {
                update_writes.push((types::branch_channel(target), Value::Null));
            }
            if !spec.routers.is_empty() {
                let route_state = io::overlay_state(
                    &channels,
                    &update_writes,
                    &core.state_channel_names(),
                )?;
                for router in &spec.routers {
                    match router(&route_state) {
                        crate::graph::RouterResult::Node(node) => {
                            if node != types::END {
                                update_writes.push((types::branch_channel(&node), Value::Null));
                            }
                        }
                        crate::graph::RouterResult::Nodes(nodes) => {
                            for node in nodes {
                                if node != types::END {
                                    update_writes
                                        .push((types::branch_channel(&node), Value::Null));
                                }
                            }
                        }
                        crate::graph::RouterResult::Sends(new_sends) => sends.extend(new_sends),
                        crate::graph::RouterResult::End => {}
                    }
                }
            }
        }

        let writer = TaskWrites {
            name: node_name.to_string(),
            path: TaskPath::Pull {
                node: node_name.to_string(),
            },
            triggers: Vec::new(),
            writes: update_writes,
            sends,
        };
        let saver_for_versions = saver.clone();
        let bump = move |current: Option<&stategraph_checkpoint::ChannelVersion>| {
            saver_for_versions.next_version(current, "")
        };
        algo::apply_writes(
            &mut checkpoint,
            &mut channels,
            &[writer],
            &bump,
            &core.consume_channels,
        )?;

        checkpoint.channel_values = io::snapshot_channels(&channels);
        checkpoint.id = uuid::Uuid::new_v4().to_string();
        checkpoint.ts = Utc::now();
        ckpt_config.thread_id = config.thread_id.clone();

        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Update)
            .with_step(prev_step + 1);
        let stored = saver
            .put(
                &ckpt_config,
                checkpoint.clone(),
                metadata,
                checkpoint.channel_versions.clone(),
            )
            .await?;
        Ok(stored)
    }

    fn snapshot_from_tuple(
        &self,
        tuple: CheckpointTuple,
        subgraphs: bool,
    ) -> BoxFuture<'_, Result<StateSnapshot>> {
        async move {
            let core = self.core().clone();
            let mut channels = core.build_channels();
            io::restore_channels(&mut channels, &tuple.checkpoint.channel_values)?;

            let step = tuple.metadata.step.unwrap_or(-1) + 1;
            let planned = algo::prepare_next_tasks(&tuple.checkpoint, &core, &channels, step)?;

            let mut recorded: HashMap<&str, Vec<(&str, &Value)>> = HashMap::new();
            for write in &tuple.pending_writes {
                recorded
                    .entry(write.task_id.as_str())
                    .or_default()
                    .push((write.channel.as_str(), &write.value));
            }

            let mut tasks = Vec::with_capacity(planned.len());
            for task in &planned {
                let entries = recorded.get(task.id.as_str());
                let error = entries.and_then(|entries| {
                    entries.iter().find(|(c, _)| *c == ERROR_CHANNEL).map(|(_, v)| {
                        v.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    })
                });
                let interrupts: Vec<Interrupt> = entries
                    .map(|entries| {
                        entries
                            .iter()
                            .filter(|(c, _)| *c == INTERRUPT_CHANNEL)
                            .filter_map(|(_, v)| serde_json::from_value((*v).clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default();

                let state = if subgraphs && core.nodes[&task.name].is_subgraph() {
                    let child_ns = types::child_namespace(
                        &tuple.config.checkpoint_ns,
                        &task.name,
                        &task.id,
                    );
                    let child_config = CheckpointConfig {
                        thread_id: tuple.config.thread_id.clone(),
                        checkpoint_ns: child_ns,
                        checkpoint_id: None,
                        checkpoint_map: HashMap::new(),
                    };
                    let mut child = self
                        .subgraph(&task.name)
                        .expect("subgraph spec without subgraph")
                        .clone();
                    if child.saver().is_none() {
                        if let Some(saver) = self.saver() {
                            child = child.with_checkpointer(saver.clone());
                        }
                    }
                    child
                        .get_state(&child_config, true)
                        .await?
                        .map(Box::new)
                } else {
                    None
                };

                tasks.push(TaskSnapshot {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    path: task.path.clone(),
                    error,
                    interrupts,
                    state,
                });
            }

            Ok(StateSnapshot {
                values: io::read_state(&channels, &core.state_channel_names()),
                next: planned.into_iter().map(|t| t.name).collect(),
                tasks,
                metadata: tuple.metadata,
                config: tuple.config,
                parent_config: tuple.parent_config,
                created_at: tuple.checkpoint.ts,
            })
        }
        .boxed()
    }
}
