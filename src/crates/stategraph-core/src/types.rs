//! Reserved names, task paths and deterministic identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Virtual entry node and its signal channel.
pub const START: &str = "__start__";
/// Virtual exit node; routing here means "stop".
pub const END: &str = "__end__";
/// Pending-write channel carrying a task's dynamic interrupt record.
pub const INTERRUPT_CHANNEL: &str = "__interrupt__";
/// Pending-write channel carrying a task's terminal error.
pub const ERROR_CHANNEL: &str = "__error__";
/// Pending-write channel carrying a task's Send descriptors.
pub const SEND_CHANNEL: &str = "__send__";
/// Pending-write marker recorded for tasks that completed with no writes,
/// so a resume can still tell them apart from never-ran tasks.
pub const NO_WRITES_CHANNEL: &str = "__no_writes__";

/// Prefix of the per-node trigger channels the compiler wires edges into.
const BRANCH_PREFIX: &str = "branch:to:";

/// Trigger channel for a node.
pub fn branch_channel(node: &str) -> String {
    format!("{BRANCH_PREFIX}{node}")
}

/// Is this name reserved for engine bookkeeping?
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__") || name.starts_with(BRANCH_PREFIX)
}

/// Where a task came from: a triggered node (Pull) or a Send (Push).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskPath {
    /// Scheduled because a trigger channel advanced past the node's seen
    /// version.
    Pull {
        /// The triggered node.
        node: String,
    },
    /// Scheduled because a Send targeted the node; `index` is the Send's
    /// position within the producing step.
    Push {
        /// Position among the step's pending sends.
        index: usize,
    },
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPath::Pull { node } => write!(f, "pull:{node}"),
            TaskPath::Push { index } => write!(f, "push:{index}"),
        }
    }
}

/// Namespace UUID under which task ids are derived.
fn task_namespace() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, b"stategraph.task")
}

/// Deterministic task id: a v5 UUID over `(checkpoint_id, path, step)`.
/// Replanning the same step of the same checkpoint reproduces the same id,
/// which is what lets pending writes be reattributed after a resume.
pub fn deterministic_task_id(checkpoint_id: &str, path: &TaskPath, step: i64) -> String {
    let seed = format!("{checkpoint_id}|{step}|{path}");
    Uuid::new_v5(&task_namespace(), seed.as_bytes()).to_string()
}

/// Nested checkpoint namespace for a subgraph invocation:
/// `parent_ns:node:hash(task_id)`, with the leading separator omitted at
/// the root. The hash is stable across replans because task ids are.
pub fn child_namespace(parent_ns: &str, node: &str, task_id: &str) -> String {
    let segment = child_segment(node, task_id);
    if parent_ns.is_empty() {
        segment
    } else {
        format!("{parent_ns}:{segment}")
    }
}

/// One namespace segment, `node:hash8`.
pub fn child_segment(node: &str, task_id: &str) -> String {
    let compact: String = task_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{node}:{compact}")
}
