//! Dynamic task creation: the [`Send`] descriptor.
//!
//! A conditional router (or a node returning a `Command` with goto
//! targets) may emit `Send(target, payload)` writes instead of routing to
//! fixed successors. Each Send becomes a Push task in the *following*
//! superstep with exactly the payload it carried - bypassing the
//! trigger-version check, so a Send always executes. This is the
//! map-reduce primitive: fan a collection out into per-item tasks, then
//! let an aggregating channel fold the results back together.
//!
//! Sends are persisted on the checkpoint (`pending_sends`) between the
//! step that produced them and the step that consumes them, so they
//! survive interrupts and crashes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A deferred task: run `node` next step with `input` as its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Send {
    /// Target node name.
    pub node: String,
    /// Payload handed to the target as its input, verbatim.
    pub input: Value,
}

impl Send {
    /// Create a send descriptor.
    pub fn new(node: impl Into<String>, input: Value) -> Self {
        Self {
            node: node.into(),
            input,
        }
    }
}
