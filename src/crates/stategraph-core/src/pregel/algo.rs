//! Core planning and commit algorithms.
//!
//! [`prepare_next_tasks`] is pure with respect to the checkpoint: planning
//! the same step of the same checkpoint twice yields identical tasks with
//! identical ids, which is what makes interrupt/resume and pending-write
//! replay sound.
//!
//! [`apply_writes`] is the step barrier: every mutation of channel state
//! funnels through one deterministic pass, so concurrent task execution
//! order can never leak into the committed state.

use crate::error::Result;
use crate::graph::compiled::GraphCore;
use crate::pregel::io;
use crate::pregel::task::{ExecutableTask, TaskWrites};
use crate::send::Send;
use crate::types::{deterministic_task_id, TaskPath};
use serde_json::Value;
use stategraph_checkpoint::{ChannelVersion, Channel, Checkpoint};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Enumerate the tasks executable at `step`, Push tasks first (in send
/// order), then Pull tasks in node declaration order.
///
/// A node pulls when any of its trigger channels is non-empty *and* its
/// version is strictly greater than what the node has seen. Sends bypass
/// the version check entirely - a Send always executes.
pub fn prepare_next_tasks(
    checkpoint: &Checkpoint,
    core: &GraphCore,
    channels: &HashMap<String, Box<dyn Channel>>,
    step: i64,
) -> Result<Vec<ExecutableTask>> {
    let null_version = ChannelVersion::null();
    let mut tasks = Vec::new();

    // Push tasks from pending sends.
    for (index, descriptor) in checkpoint.pending_sends.iter().enumerate() {
        let send: Send = match serde_json::from_value(descriptor.clone()) {
            Ok(send) => send,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed pending send");
                continue;
            }
        };
        if !core.nodes.contains_key(&send.node) {
            tracing::warn!(node = %send.node, "dropping send to unknown node");
            continue;
        }
        let path = TaskPath::Push { index };
        tasks.push(ExecutableTask {
            id: deterministic_task_id(&checkpoint.id, &path, step),
            name: send.node,
            path,
            input: send.input,
            triggers: Vec::new(),
        });
    }

    // Pull tasks from advanced trigger channels.
    for name in &core.node_order {
        let spec = &core.nodes[name];
        let seen = checkpoint.versions_seen.get(name);
        let triggered = spec.triggers.iter().any(|trigger| {
            let available = channels
                .get(trigger)
                .map(|channel| channel.is_available())
                .unwrap_or(false);
            if !available {
                return false;
            }
            let current = checkpoint
                .channel_versions
                .get(trigger)
                .unwrap_or(&null_version);
            let last_seen = seen
                .and_then(|versions| versions.get(trigger))
                .unwrap_or(&null_version);
            current > last_seen
        });
        if !triggered {
            continue;
        }

        let input_keys = spec
            .input_channels
            .clone()
            .unwrap_or_else(|| core.state_channel_names());
        let path = TaskPath::Pull { node: name.clone() };
        tasks.push(ExecutableTask {
            id: deterministic_task_id(&checkpoint.id, &path, step),
            name: name.clone(),
            path,
            input: io::read_state(channels, &input_keys),
            triggers: spec.triggers.clone(),
        });
    }

    Ok(tasks)
}

/// Apply the writes of every settled task as one atomic commit.
///
/// Order of operations, mirroring the scheduling rule in
/// [`prepare_next_tasks`]:
///
/// 1. Record `versions_seen` for each pulled task from the pre-step
///    versions.
/// 2. Consume the trigger channels that fired (clearing their signal and
///    advancing their version past every node's seen mark - availability
///    is what prevents spurious re-triggers).
/// 3. Consume consume-on-read state channels.
/// 4. Replace pending sends with the sends produced this step (the old
///    ones were all planned by this step, so this is their exactly-once
///    consumption).
/// 5. Group writes by channel, in deterministic task order, and apply
///    each group in a single `update` call; the channel enforces its own
///    merge rule (exclusive channels reject concurrent writes here).
///
/// Returns the set of channels whose state changed.
pub fn apply_writes(
    checkpoint: &mut Checkpoint,
    channels: &mut HashMap<String, Box<dyn Channel>>,
    tasks: &[TaskWrites],
    next_version: &dyn Fn(Option<&ChannelVersion>) -> ChannelVersion,
    consume_channels: &[String],
) -> Result<HashSet<String>> {
    // Deterministic commit order, independent of settlement order.
    let mut ordered: Vec<&TaskWrites> = tasks.iter().collect();
    ordered.sort_by_key(|task| task.path.to_string());

    // Pull tasks carry triggers; Push tasks carry none but still mark an
    // executed step (their consumption must retire the pending sends).
    // Input/update application is neither.
    let executed_step = ordered
        .iter()
        .any(|task| !task.triggers.is_empty() || matches!(task.path, TaskPath::Push { .. }));

    // 1. Seen versions from the pre-step state.
    for task in &ordered {
        if task.triggers.is_empty() {
            continue;
        }
        let seen = checkpoint
            .versions_seen
            .entry(task.name.clone())
            .or_default();
        for trigger in &task.triggers {
            if let Some(version) = checkpoint.channel_versions.get(trigger) {
                seen.insert(trigger.clone(), version.clone());
            }
        }
    }

    let next = next_version(checkpoint.max_version());

    // 2. Consume fired triggers.
    let fired: HashSet<&String> = ordered.iter().flat_map(|task| &task.triggers).collect();
    for trigger in fired {
        if let Some(channel) = channels.get_mut(trigger) {
            if channel.consume() {
                checkpoint
                    .channel_versions
                    .insert(trigger.clone(), next.clone());
            }
        }
    }

    // 3. Consume-on-read state channels, once per executed step.
    if executed_step {
        for name in consume_channels {
            if let Some(channel) = channels.get_mut(name) {
                if channel.consume() {
                    checkpoint
                        .channel_versions
                        .insert(name.clone(), next.clone());
                }
            }
        }
    }

    // 4. Pending sends: consumed by this step, replaced by this step's
    //    production. Input/update application (no executed tasks) only
    //    appends.
    let produced: Vec<Value> = ordered
        .iter()
        .flat_map(|task| task.sends.iter())
        .map(|send| serde_json::to_value(send))
        .collect::<std::result::Result<_, _>>()?;
    if executed_step {
        checkpoint.pending_sends = produced;
    } else {
        checkpoint.pending_sends.extend(produced);
    }

    // 5. Grouped write application.
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for task in &ordered {
        for (channel, value) in &task.writes {
            grouped
                .entry(channel.clone())
                .or_default()
                .push(value.clone());
        }
    }

    let mut updated = HashSet::new();
    for (name, values) in grouped {
        let Some(channel) = channels.get_mut(&name) else {
            return Err(crate::error::GraphError::InvalidUpdate(format!(
                "write to unknown channel '{name}'"
            )));
        };
        if channel.update(values)? {
            checkpoint.channel_versions.insert(name.clone(), next.clone());
            updated.insert(name);
        }
    }

    Ok(updated)
}
