//! Task structures: planned work and settled writes.

use crate::send::Send;
use crate::types::TaskPath;
use serde_json::Value;

/// A unit of work planned for one step. Lives only within that step.
#[derive(Debug, Clone)]
pub struct ExecutableTask {
    /// Deterministic id over `(checkpoint_id, path, step)`.
    pub id: String,
    /// The node to execute.
    pub name: String,
    /// Pull or Push provenance.
    pub path: TaskPath,
    /// Input view handed to the node.
    pub input: Value,
    /// Channels whose advance scheduled this task (empty for Push).
    pub triggers: Vec<String>,
}

/// The writes a settled task contributes to the step's commit.
#[derive(Debug, Clone)]
pub struct TaskWrites {
    /// Producing node.
    pub name: String,
    /// Provenance, used for deterministic commit ordering.
    pub path: TaskPath,
    /// Trigger channels of the producing task.
    pub triggers: Vec<String>,
    /// Channel writes: state updates plus successor trigger signals.
    pub writes: Vec<(String, Value)>,
    /// Dynamic sends deferred to the next step.
    pub sends: Vec<Send>,
}

impl TaskWrites {
    /// The state portion of the writes as an update object, with engine
    /// bookkeeping channels filtered out. This is what the `updates`
    /// stream mode shows for the task.
    pub fn update_object(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (channel, value) in &self.writes {
            if !crate::types::is_reserved(channel) {
                object.insert(channel.clone(), value.clone());
            }
        }
        Value::Object(object)
    }
}
