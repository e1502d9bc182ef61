//! The executable form of a graph.
//!
//! [`CompiledGraph`] is cheap to clone: the lowered structure lives behind
//! an `Arc`, while per-instance collaborators (checkpointer, store,
//! compiled-in interrupts, retry policy) ride alongside so one structure
//! can serve several configurations.

use crate::config::{GraphInput, RunConfig};
use crate::error::Result;
use crate::graph::{ChannelKind, Router};
use crate::interrupt::InterruptNodes;
use crate::node::Node;
use crate::pregel::{PregelLoop, RunOutcome};
use crate::retry::RetryPolicy;
use crate::store::Store;
use crate::stream::{EventSender, StreamChunk, StreamEvent, StreamMode};
use crate::types::{self, START};
use serde_json::{json, Value};
use stategraph_checkpoint::{
    BinaryOperatorChannel, Channel, CheckpointSaver, EphemeralValueChannel, LastValueChannel,
    TopicChannel,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a node executes: a task function or a nested compiled graph.
#[derive(Clone)]
pub enum NodeRunner {
    /// Plain async function node.
    Task(Arc<dyn Node>),
    /// Nested graph, run under a child checkpoint namespace.
    Subgraph(CompiledGraph),
}

/// Lowered per-node execution spec.
#[derive(Clone)]
pub struct NodeSpec {
    /// Node name.
    pub name: String,
    /// How the node executes.
    pub runner: NodeRunner,
    /// Channels whose version advances schedule this node.
    pub triggers: Vec<String>,
    /// Static successor nodes (edge targets).
    pub static_targets: Vec<String>,
    /// Conditional edge routers, evaluated on the post-update state.
    pub routers: Vec<Router>,
    /// Per-node retry override.
    pub retry: Option<RetryPolicy>,
    /// Restrict the node's input view; `None` reads all state channels.
    pub input_channels: Option<Vec<String>>,
}

impl NodeSpec {
    /// Is this node a nested graph?
    pub fn is_subgraph(&self) -> bool {
        matches!(self.runner, NodeRunner::Subgraph(_))
    }
}

/// The lowered, immutable structure shared by all clones of a compiled
/// graph.
pub struct GraphCore {
    /// Declared state channels, in declaration order.
    pub channels: Vec<(String, ChannelKind)>,
    /// Node specs by name.
    pub nodes: HashMap<String, NodeSpec>,
    /// Node declaration order, for deterministic planning.
    pub node_order: Vec<String>,
    /// Trigger channel → nodes it schedules.
    pub trigger_to_nodes: HashMap<String, Vec<String>>,
    /// State channels consumed at each executed step boundary.
    pub consume_channels: Vec<String>,
}

impl GraphCore {
    /// Names of the declared state channels.
    pub fn state_channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Build a fresh channel registry: declared state channels plus the
    /// engine's trigger channels.
    pub fn build_channels(&self) -> HashMap<String, Box<dyn Channel>> {
        let mut channels: HashMap<String, Box<dyn Channel>> = HashMap::new();
        for (name, kind) in &self.channels {
            let channel: Box<dyn Channel> = match kind {
                ChannelKind::LastValue => Box::new(LastValueChannel::new(name.clone())),
                ChannelKind::Topic { dedup, consume } => {
                    let mut topic = TopicChannel::new(name.clone());
                    if *dedup {
                        topic = topic.with_dedup();
                    }
                    if *consume {
                        topic = topic.consumed_each_step();
                    }
                    Box::new(topic)
                }
                ChannelKind::BinaryOperator(reducer) => Box::new(
                    BinaryOperatorChannel::with_reducer(name.clone(), reducer.clone()),
                ),
                ChannelKind::Ephemeral => Box::new(EphemeralValueChannel::new(name.clone())),
            };
            channels.insert(name.clone(), channel);
        }
        for node in self.nodes.keys() {
            let trigger = types::branch_channel(node);
            channels.insert(
                trigger.clone(),
                Box::new(EphemeralValueChannel::new(trigger)),
            );
        }
        channels.insert(
            START.to_string(),
            Box::new(EphemeralValueChannel::new(START)),
        );
        channels
    }
}

/// An executable graph.
#[derive(Clone)]
pub struct CompiledGraph {
    core: Arc<GraphCore>,
    name: String,
    saver: Option<Arc<dyn CheckpointSaver>>,
    store: Option<Arc<dyn Store>>,
    interrupt_before: InterruptNodes,
    interrupt_after: InterruptNodes,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A running stream: the chunk receiver plus the join handle resolving to
/// the run outcome.
pub struct GraphStream {
    /// Ordered stream chunks.
    pub chunks: mpsc::Receiver<StreamChunk>,
    /// Resolves when the run finishes, errors or interrupts.
    pub handle: JoinHandle<Result<RunOutcome>>,
}

impl CompiledGraph {
    pub(crate) fn from_core(core: GraphCore) -> Self {
        Self {
            core: Arc::new(core),
            name: "graph".to_string(),
            saver: None,
            store: None,
            interrupt_before: InterruptNodes::Never,
            interrupt_after: InterruptNodes::Never,
            retry: RetryPolicy::default(),
        }
    }

    /// Attach a checkpointer; state persists per thread from here on.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    /// Attach the cross-thread store nodes see through their context.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Compile-in interrupt-before nodes (run config can extend them).
    pub fn with_interrupt_before(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_before = nodes;
        self
    }

    /// Compile-in interrupt-after nodes.
    pub fn with_interrupt_after(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_after = nodes;
        self
    }

    /// Default retry policy for nodes without an override.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Name the graph (used in introspection and logs).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lowered structure.
    pub fn core(&self) -> &Arc<GraphCore> {
        &self.core
    }

    /// The attached checkpointer, if any.
    pub fn saver(&self) -> Option<&Arc<dyn CheckpointSaver>> {
        self.saver.as_ref()
    }

    /// The attached store, if any.
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    /// Compiled-in interrupt-before setting.
    pub fn interrupt_before(&self) -> &InterruptNodes {
        &self.interrupt_before
    }

    /// Compiled-in interrupt-after setting.
    pub fn interrupt_after(&self) -> &InterruptNodes {
        &self.interrupt_after
    }

    /// Graph-level retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Spec of one node.
    pub fn node_spec(&self, name: &str) -> Option<&NodeSpec> {
        self.core.nodes.get(name)
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> &[String] {
        &self.core.node_order
    }

    /// Names of nodes that wrap subgraphs, optionally recursing into
    /// nested levels (`parent/child` joined names).
    pub fn subgraph_names(&self, recurse: bool) -> Vec<String> {
        let mut names = Vec::new();
        for name in &self.core.node_order {
            if let Some(NodeSpec {
                runner: NodeRunner::Subgraph(child),
                ..
            }) = self.core.nodes.get(name)
            {
                names.push(name.clone());
                if recurse {
                    for nested in child.subgraph_names(true) {
                        names.push(format!("{name}/{nested}"));
                    }
                }
            }
        }
        names
    }

    /// The compiled subgraph behind a node, when there is one.
    pub fn subgraph(&self, node: &str) -> Option<&CompiledGraph> {
        match self.core.nodes.get(node) {
            Some(NodeSpec {
                runner: NodeRunner::Subgraph(child),
                ..
            }) => Some(child),
            _ => None,
        }
    }

    /// Structural description: nodes and edges, for the definition
    /// registry's `/graph` endpoint.
    pub fn describe_graph(&self) -> Value {
        let nodes: Vec<Value> = self
            .core
            .node_order
            .iter()
            .map(|name| {
                let spec = &self.core.nodes[name];
                json!({
                    "id": name,
                    "type": if spec.is_subgraph() { "subgraph" } else { "task" },
                })
            })
            .collect();

        let mut edges = Vec::new();
        for name in &self.core.node_order {
            let spec = &self.core.nodes[name];
            if spec.triggers.iter().any(|t| t == START) {
                edges.push(json!({"source": START, "target": name}));
            }
            for target in &spec.static_targets {
                edges.push(json!({"source": name, "target": target}));
            }
            for _ in &spec.routers {
                edges.push(json!({"source": name, "conditional": true}));
            }
        }
        json!({"nodes": nodes, "edges": edges})
    }

    /// Channel schema: name → merge-rule label.
    pub fn describe_channels(&self) -> Value {
        let channels: serde_json::Map<String, Value> = self
            .core
            .channels
            .iter()
            .map(|(name, kind)| (name.clone(), json!(kind.label())))
            .collect();
        json!({"channels": channels})
    }

    /// Run to completion (or interrupt) without streaming.
    pub async fn invoke(&self, input: GraphInput, config: RunConfig) -> Result<RunOutcome> {
        PregelLoop::new(self.clone(), config, None).run(input).await
    }

    /// Run with streaming: returns the chunk receiver and the outcome
    /// handle. The stream is pull-based - a slow consumer backpressures
    /// the engine rather than buffering unboundedly.
    pub fn stream(
        &self,
        input: GraphInput,
        config: RunConfig,
        modes: Vec<StreamMode>,
    ) -> GraphStream {
        let (emitter, chunks) = EventSender::channel(modes, config.stream_subgraphs, 64);
        let graph = self.clone();
        let handle = tokio::spawn(async move {
            let result = PregelLoop::new(graph, config, Some(emitter.clone()))
                .run(input)
                .await;
            if let Err(err) = &result {
                emitter
                    .emit(StreamEvent::Error {
                        error: err.kind().to_string(),
                        message: err.to_string(),
                    })
                    .await;
            }
            result
        });
        GraphStream { chunks, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StateGraph;
    use serde_json::json;

    fn sample() -> CompiledGraph {
        let mut child = StateGraph::new();
        child.add_last_value_channel("inner_state");
        child.add_node_fn("leaf", |_s: Value, _c| async move { Ok(json!({})) });
        child.set_entry_point("leaf");
        child.set_finish_point("leaf");
        let child = child.compile().unwrap();

        let mut graph = StateGraph::new();
        graph.add_last_value_channel("state");
        graph.add_append_channel("messages");
        graph.add_node_fn("plan", |_s: Value, _c| async move { Ok(json!({})) });
        graph.add_subgraph("worker", child);
        graph.set_entry_point("plan");
        graph.add_edge("plan", "worker");
        graph.set_finish_point("worker");
        graph.compile().unwrap()
    }

    #[test]
    fn graph_description_lists_nodes_and_edges() {
        let description = sample().describe_graph();
        let nodes: Vec<&str> = description["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(nodes, vec!["plan", "worker"]);
        assert_eq!(
            description["nodes"][1]["type"].as_str(),
            Some("subgraph")
        );

        let edges = description["edges"].as_array().unwrap();
        assert!(edges
            .iter()
            .any(|e| e["source"] == "__start__" && e["target"] == "plan"));
        assert!(edges
            .iter()
            .any(|e| e["source"] == "plan" && e["target"] == "worker"));
    }

    #[test]
    fn channel_schema_labels_merge_rules() {
        let schema = sample().describe_channels();
        assert_eq!(schema["channels"]["state"], "last_value");
        assert_eq!(schema["channels"]["messages"], "binary_operator");
    }

    #[test]
    fn subgraph_names_recurse() {
        let graph = sample();
        assert_eq!(graph.subgraph_names(false), vec!["worker"]);
        // The leaf child has no nested subgraphs of its own.
        assert_eq!(graph.subgraph_names(true), vec!["worker"]);
        assert!(graph.subgraph("worker").is_some());
        assert!(graph.subgraph("plan").is_none());
    }

    #[test]
    fn clones_share_the_lowered_core() {
        let graph = sample();
        let configured = graph
            .clone()
            .with_interrupt_before(crate::interrupt::InterruptNodes::from_list(["plan"]));
        assert!(Arc::ptr_eq(graph.core(), configured.core()));
        assert!(configured.interrupt_before().matches("plan"));
        assert!(!graph.interrupt_before().matches("plan"));
    }

    #[test]
    fn built_channels_cover_state_and_triggers() {
        let graph = sample();
        let channels = graph.core().build_channels();
        assert!(channels.contains_key("state"));
        assert!(channels.contains_key("messages"));
        assert!(channels.contains_key("__start__"));
        assert!(channels.contains_key("branch:to:plan"));
        assert!(channels.contains_key("branch:to:worker"));
    }
}
