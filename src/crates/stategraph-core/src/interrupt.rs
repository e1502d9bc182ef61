//! Interrupt records and static interrupt configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// When, relative to node execution, an interrupt fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptWhen {
    /// Static `interrupt_before`: the node has not run.
    Before,
    /// Dynamic `interrupt(...)` raised inside the node.
    During,
    /// Static `interrupt_after`: the node just finished.
    After,
}

/// A recorded suspension, surfaced on the interrupted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    /// The value handed to `interrupt(...)`, or `null` for static
    /// interrupts.
    pub value: Value,
    /// When the interrupt fired.
    pub when: InterruptWhen,
    /// Whether a resume value can satisfy it.
    pub resumable: bool,
    /// Namespace path of the graph that raised it (empty at the root).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ns: Vec<String>,
}

impl Interrupt {
    /// A dynamic, resumable interrupt raised inside a node.
    pub fn during(value: Value, ns: Vec<String>) -> Self {
        Self {
            value,
            when: InterruptWhen::During,
            resumable: true,
            ns,
        }
    }
}

/// Which nodes a static interrupt setting applies to.
///
/// Parsed from the run configuration: an explicit node list, or `"*"` for
/// every user-visible node.
#[derive(Debug, Clone, Default)]
pub enum InterruptNodes {
    /// Interrupt nothing (the default).
    #[default]
    Never,
    /// Interrupt around every node.
    All,
    /// Interrupt around the named nodes.
    Named(HashSet<String>),
}

impl InterruptNodes {
    /// Parse from a configured list; a single `"*"` entry means all.
    pub fn from_list<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = nodes.into_iter().map(Into::into).collect();
        if names.is_empty() {
            InterruptNodes::Never
        } else if names.contains("*") {
            InterruptNodes::All
        } else {
            InterruptNodes::Named(names)
        }
    }

    /// Does the setting match this node?
    pub fn matches(&self, node: &str) -> bool {
        match self {
            InterruptNodes::Never => false,
            InterruptNodes::All => !crate::types::is_reserved(node),
            InterruptNodes::Named(names) => names.contains(node),
        }
    }

    /// True when no node can ever match.
    pub fn is_never(&self) -> bool {
        matches!(self, InterruptNodes::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_user_nodes_only() {
        let all = InterruptNodes::from_list(["*"]);
        assert!(all.matches("agent"));
        assert!(!all.matches("__start__"));
    }

    #[test]
    fn named_set_matches_exactly() {
        let named = InterruptNodes::from_list(["tool"]);
        assert!(named.matches("tool"));
        assert!(!named.matches("agent"));
        assert!(InterruptNodes::from_list(Vec::<String>::new()).is_never());
    }
}
