//! The [`Command`] type: state updates, resume values and explicit routing.
//!
//! A command can arrive two ways:
//!
//! - **As run input** - `Command { update }` applies a state update through
//!   the `__start__` pseudo-node (checkpoint `source = "update"`, no user
//!   node executes for the update itself); `Command { resume }` re-executes
//!   an interrupted task with the resume value injected into its
//!   `interrupt(...)` call.
//! - **As node output** - `Command { update, goto }` lets a node both write
//!   state and route explicitly, including dynamic [`Send`] targets.

use crate::send::Send;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Explicit routing target carried by a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GotoTarget {
    /// Route to a named node.
    Node(String),
    /// Spawn a dynamic Push task.
    Send(Send),
}

impl From<&str> for GotoTarget {
    fn from(node: &str) -> Self {
        GotoTarget::Node(node.to_string())
    }
}

impl From<String> for GotoTarget {
    fn from(node: String) -> Self {
        GotoTarget::Node(node)
    }
}

impl From<Send> for GotoTarget {
    fn from(send: Send) -> Self {
        GotoTarget::Send(send)
    }
}

/// A control instruction combining state update, resume and routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    /// State update applied as channel writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,

    /// Resume value for the single interrupted task of the thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<Value>,

    /// Resume values keyed by task id, for resuming specific tasks when
    /// several are interrupted.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resume_map: HashMap<String, Value>,

    /// Explicit routing targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goto: Vec<GotoTarget>,
}

impl Command {
    /// Command carrying only a state update.
    pub fn update(update: Value) -> Self {
        Self {
            update: Some(update),
            ..Self::default()
        }
    }

    /// Command carrying only a resume value.
    pub fn resume(value: Value) -> Self {
        Self {
            resume: Some(value),
            ..Self::default()
        }
    }

    /// Add a routing target.
    pub fn with_goto(mut self, target: impl Into<GotoTarget>) -> Self {
        self.goto.push(target.into());
        self
    }

    /// Add a keyed resume value.
    pub fn with_resume_for(mut self, task_id: impl Into<String>, value: Value) -> Self {
        self.resume_map.insert(task_id.into(), value);
        self
    }

    /// Does this command carry anything to resume with?
    pub fn has_resume(&self) -> bool {
        self.resume.is_some() || !self.resume_map.is_empty()
    }
}
