//! Graph construction: channels, nodes, edges, routers.
//!
//! [`StateGraph`] is the builder. Declare the state channels with their
//! merge rules, add nodes (functions or compiled subgraphs), wire static
//! and conditional edges, then [`StateGraph::compile`] into a
//! [`CompiledGraph`](crate::graph::compiled::CompiledGraph) that can be
//! invoked, streamed and inspected.
//!
//! Execution never walks the edge list: compilation lowers edges into
//! per-node trigger channels (`branch:to:<node>`) and writer sets, and the
//! engine schedules purely off channel versions. Convergence is "no
//! triggered tasks and no pending sends", not structural acyclicity -
//! cycles are legal and bounded by the recursion limit.

pub mod compiled;

use crate::error::{GraphError, Result};
use crate::node::{FnNode, Node, NodeContext, NodeError, NodeOutput};
use crate::retry::RetryPolicy;
use crate::send::Send as SendPacket;
use crate::types::{self, END, START};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use compiled::{CompiledGraph, GraphCore, NodeRunner, NodeSpec};
use stategraph_checkpoint::Reducer;

/// Merge rule for one declared state channel.
#[derive(Clone)]
pub enum ChannelKind {
    /// Exclusive slot, replaced by the single write of a step.
    LastValue,
    /// Ordered accumulation of writes.
    Topic {
        /// Drop writes already accumulated.
        dedup: bool,
        /// Clear the accumulated sequence each step it is consumed.
        consume: bool,
    },
    /// Fold writes with an associative operator.
    BinaryOperator(Reducer),
    /// Write-only signal, visible for one step.
    Ephemeral,
}

impl ChannelKind {
    /// Wire label used by schema introspection.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::LastValue => "last_value",
            ChannelKind::Topic { .. } => "topic",
            ChannelKind::BinaryOperator(_) => "binary_operator",
            ChannelKind::Ephemeral => "ephemeral",
        }
    }
}

impl std::fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a conditional edge router.
#[derive(Debug, Clone)]
pub enum RouterResult {
    /// Route to one node.
    Node(String),
    /// Route to several nodes in parallel.
    Nodes(Vec<String>),
    /// Spawn dynamic Push tasks.
    Sends(Vec<SendPacket>),
    /// Stop this branch.
    End,
}

/// A conditional edge: reads the routing state, returns targets.
pub type Router = Arc<dyn Fn(&Value) -> RouterResult + Send + Sync>;

struct NodeDef {
    runner: NodeRunner,
    retry: Option<RetryPolicy>,
    input_channels: Option<Vec<String>>,
}

/// Builder for a graph of nodes communicating through named channels.
pub struct StateGraph {
    channels: Vec<(String, ChannelKind)>,
    nodes: Vec<(String, NodeDef)>,
    edges: Vec<(String, String)>,
    branches: Vec<(String, Router)>,
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StateGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            branches: Vec::new(),
        }
    }

    /// Declare a state channel.
    pub fn add_channel(&mut self, name: impl Into<String>, kind: ChannelKind) -> &mut Self {
        self.channels.push((name.into(), kind));
        self
    }

    /// Declare an exclusive (last-value) channel - the common case.
    pub fn add_last_value_channel(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_channel(name, ChannelKind::LastValue)
    }

    /// Declare an appending channel backed by the array-concat operator,
    /// the conventional shape for message histories.
    pub fn add_append_channel(&mut self, name: impl Into<String>) -> &mut Self {
        let reducer: Reducer = Arc::new(|a: Value, b: Value| {
            let mut out = match a {
                Value::Array(items) => items,
                other => vec![other],
            };
            match b {
                Value::Array(items) => out.extend(items),
                other => out.push(other),
            }
            Value::Array(out)
        });
        self.add_channel(name, ChannelKind::BinaryOperator(reducer))
    }

    /// Add a node backed by any [`Node`] implementation.
    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node + 'static) -> &mut Self {
        self.nodes.push((
            name.into(),
            NodeDef {
                runner: NodeRunner::Task(Arc::new(node)),
                retry: None,
                input_channels: None,
            },
        ));
        self
    }

    /// Add a node from an async closure.
    pub fn add_node_fn<F, Fut, O>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<O, NodeError>> + Send + 'static,
        O: Into<NodeOutput>,
    {
        self.add_node(name, FnNode::new(f))
    }

    /// Add a compiled graph as a node. The child executes under a nested
    /// checkpoint namespace against the parent's checkpointer.
    pub fn add_subgraph(&mut self, name: impl Into<String>, graph: CompiledGraph) -> &mut Self {
        self.nodes.push((
            name.into(),
            NodeDef {
                runner: NodeRunner::Subgraph(graph),
                retry: None,
                input_channels: None,
            },
        ));
        self
    }

    /// Override the retry policy of the most recently added node.
    pub fn with_retry(&mut self, policy: RetryPolicy) -> &mut Self {
        if let Some((_, def)) = self.nodes.last_mut() {
            def.retry = Some(policy);
        }
        self
    }

    /// Restrict the input view of the most recently added node to the
    /// given channels (defaults to all state channels).
    pub fn with_input_channels<I, S>(&mut self, channels: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some((_, def)) = self.nodes.last_mut() {
            def.input_channels = Some(channels.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Add a static edge. `from` may be [`START`], `to` may be [`END`].
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Add a conditional edge: after `from` runs, the router inspects the
    /// state (with `from`'s own update applied) and picks the targets.
    pub fn add_conditional_edges<F>(&mut self, from: impl Into<String>, router: F) -> &mut Self
    where
        F: Fn(&Value) -> RouterResult + Send + Sync + 'static,
    {
        self.branches.push((from.into(), Arc::new(router)));
        self
    }

    /// Sugar for `add_edge(START, node)`.
    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Sugar for `add_edge(node, END)`.
    pub fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.add_edge(node, END)
    }

    /// Validate the structure and lower it into an executable graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        let node_names: HashSet<&str> = self.nodes.iter().map(|(n, _)| n.as_str()).collect();
        let channel_names: HashSet<&str> = self.channels.iter().map(|(n, _)| n.as_str()).collect();

        if self.nodes.is_empty() {
            return Err(GraphError::Validation("graph has no nodes".into()));
        }
        if node_names.len() != self.nodes.len() {
            return Err(GraphError::Validation("duplicate node name".into()));
        }
        for (name, _) in &self.nodes {
            if types::is_reserved(name) || name == END {
                return Err(GraphError::Validation(format!(
                    "node name '{name}' is reserved"
                )));
            }
            if channel_names.contains(name.as_str()) {
                return Err(GraphError::Validation(format!(
                    "'{name}' is both a node and a channel"
                )));
            }
        }
        for (name, _) in &self.channels {
            if types::is_reserved(name) {
                return Err(GraphError::Validation(format!(
                    "channel name '{name}' is reserved"
                )));
            }
        }
        for (from, to) in &self.edges {
            if from != START && !node_names.contains(from.as_str()) {
                return Err(GraphError::Validation(format!(
                    "edge source '{from}' is not a node"
                )));
            }
            if to != END && !node_names.contains(to.as_str()) {
                return Err(GraphError::Validation(format!(
                    "edge target '{to}' is not a node"
                )));
            }
        }
        if !self.edges.iter().any(|(from, _)| from == START) {
            return Err(GraphError::Validation(
                "graph has no entry point: add an edge from __start__".into(),
            ));
        }
        for (from, _) in &self.branches {
            if !node_names.contains(from.as_str()) {
                return Err(GraphError::Validation(format!(
                    "conditional edge source '{from}' is not a node"
                )));
            }
        }
        for (_, def) in &self.nodes {
            if let Some(inputs) = &def.input_channels {
                for input in inputs {
                    if !channel_names.contains(input.as_str()) {
                        return Err(GraphError::Validation(format!(
                            "input channel '{input}' is not declared"
                        )));
                    }
                }
            }
        }

        // Lower edges into triggers and writer sets.
        let mut specs: HashMap<String, NodeSpec> = HashMap::new();
        let node_order: Vec<String> = self.nodes.iter().map(|(n, _)| n.clone()).collect();
        for (name, def) in self.nodes {
            let mut triggers = vec![types::branch_channel(&name)];
            if self.edges.iter().any(|(f, t)| f == START && t == &name) {
                triggers.push(START.to_string());
            }
            specs.insert(
                name.clone(),
                NodeSpec {
                    name,
                    runner: def.runner,
                    triggers,
                    static_targets: Vec::new(),
                    routers: Vec::new(),
                    retry: def.retry,
                    input_channels: def.input_channels,
                },
            );
        }
        for (from, to) in &self.edges {
            if from == START || to == END {
                continue;
            }
            let spec = specs
                .get_mut(from)
                .ok_or_else(|| GraphError::Validation(format!("unknown node '{from}'")))?;
            if !spec.static_targets.contains(to) {
                spec.static_targets.push(to.clone());
            }
        }
        for (from, router) in self.branches {
            let spec = specs
                .get_mut(&from)
                .ok_or_else(|| GraphError::Validation(format!("unknown node '{from}'")))?;
            spec.routers.push(router);
        }

        let mut trigger_to_nodes: HashMap<String, Vec<String>> = HashMap::new();
        for name in &node_order {
            for trigger in &specs[name].triggers {
                trigger_to_nodes
                    .entry(trigger.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        let consume_channels = self
            .channels
            .iter()
            .filter(|(_, kind)| {
                matches!(
                    kind,
                    ChannelKind::Topic { consume: true, .. } | ChannelKind::Ephemeral
                )
            })
            .map(|(name, _)| name.clone())
            .collect();

        Ok(CompiledGraph::from_core(GraphCore {
            channels: self.channels,
            nodes: specs,
            node_order,
            trigger_to_nodes,
            consume_channels,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(mut graph: StateGraph, name: &str) -> StateGraph {
        graph.add_node_fn(name, |_state, _ctx| async move { Ok(json!({})) });
        graph
    }

    #[test]
    fn compile_requires_entry_point() {
        let mut graph = StateGraph::new();
        graph.add_node_fn("a", |_s, _c| async move { Ok(json!({})) });
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn compile_rejects_reserved_names() {
        let mut graph = StateGraph::new();
        graph.add_node_fn("__start__", |_s, _c| async move { Ok(json!({})) });
        graph.set_entry_point("__start__");
        assert!(graph.compile().is_err());
    }

    #[test]
    fn compile_rejects_dangling_edges() {
        let mut graph = StateGraph::new();
        graph.add_node_fn("a", |_s, _c| async move { Ok(json!({})) });
        graph.set_entry_point("a");
        graph.add_edge("a", "missing");
        assert!(graph.compile().is_err());
    }

    #[test]
    fn compile_wires_triggers_and_targets() {
        let mut graph = StateGraph::new();
        graph.add_last_value_channel("state");
        graph.add_node_fn("a", |_s, _c| async move { Ok(json!({})) });
        graph.add_node_fn("b", |_s, _c| async move { Ok(json!({})) });
        graph.set_entry_point("a");
        graph.add_edge("a", "b");
        graph.set_finish_point("b");
        let compiled = graph.compile().unwrap();

        let spec_a = compiled.node_spec("a").unwrap();
        assert!(spec_a.triggers.contains(&"__start__".to_string()));
        assert_eq!(spec_a.static_targets, vec!["b".to_string()]);

        let spec_b = compiled.node_spec("b").unwrap();
        assert!(spec_b.triggers.contains(&"branch:to:b".to_string()));
        assert!(spec_b.static_targets.is_empty());
    }

    #[test]
    fn duplicate_nodes_rejected() {
        let graph = noop(noop(StateGraph::new(), "a"), "a");
        assert!(graph.compile().is_err());
    }
}
