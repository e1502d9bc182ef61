//! Per-run configuration and run input.

use crate::command::Command;
use crate::interrupt::InterruptNodes;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Default superstep budget before a run is declared runaway.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Default bound on concurrently executing tasks within one step.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// What a run starts from.
#[derive(Debug, Clone)]
pub enum GraphInput {
    /// Initial writes to the input channels.
    Values(Value),
    /// A control command: state update and/or resume values.
    Command(Command),
    /// No input - resume from the latest checkpoint.
    Resume,
}

impl From<Value> for GraphInput {
    fn from(value: Value) -> Self {
        GraphInput::Values(value)
    }
}

impl From<Command> for GraphInput {
    fn from(command: Command) -> Self {
        GraphInput::Command(command)
    }
}

/// Everything configurable about a single run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Thread whose checkpoint history the run reads and extends. `None`
    /// runs ephemerally (requires no checkpointer).
    pub thread_id: Option<String>,
    /// Checkpoint namespace; empty at the root, set by the engine for
    /// subgraph invocations.
    pub checkpoint_ns: String,
    /// Start from this historical checkpoint instead of the latest
    /// (forking the thread's history).
    pub checkpoint_id: Option<String>,
    /// Ancestor checkpoint ids, forwarded into subgraph runs.
    pub checkpoint_map: HashMap<String, String>,
    /// Namespace path as segments (`node:hash` per subgraph level);
    /// carried on stream chunks and interrupt records.
    pub ns_path: Vec<String>,
    /// Maximum supersteps before `GraphError::Recursion`.
    pub recursion_limit: usize,
    /// Bound on concurrently executing tasks within a step.
    pub max_concurrency: usize,
    /// Per-run key/values made visible to nodes.
    pub configurable: HashMap<String, Value>,
    /// Caller metadata, merged into checkpoint metadata and the stream's
    /// opening `metadata` event.
    pub metadata: HashMap<String, Value>,
    /// Pause before executing matching nodes.
    pub interrupt_before: InterruptNodes,
    /// Pause after executing matching nodes.
    pub interrupt_after: InterruptNodes,
    /// Forward namespaced subgraph events on the stream.
    pub stream_subgraphs: bool,
    /// Cooperative cancellation, checked between supersteps and task
    /// settlements.
    pub cancellation: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpoint_ns: String::new(),
            checkpoint_id: None,
            checkpoint_map: HashMap::new(),
            ns_path: Vec::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            configurable: HashMap::new(),
            metadata: HashMap::new(),
            interrupt_before: InterruptNodes::Never,
            interrupt_after: InterruptNodes::Never,
            stream_subgraphs: false,
            cancellation: CancellationToken::new(),
        }
    }
}

impl RunConfig {
    /// Config for a thread-backed run.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    /// Fork from a specific historical checkpoint.
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the recursion limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Set interrupt-before nodes.
    pub fn with_interrupt_before(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_before = nodes;
        self
    }

    /// Set interrupt-after nodes.
    pub fn with_interrupt_after(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_after = nodes;
        self
    }

    /// Add a configurable value visible to nodes.
    pub fn with_configurable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }

    /// Add caller metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Opt into namespaced subgraph stream events.
    pub fn with_stream_subgraphs(mut self, enabled: bool) -> Self {
        self.stream_subgraphs = enabled;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}
