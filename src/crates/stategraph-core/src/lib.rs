//! # stategraph-core - Pregel execution engine for agent workflows
//!
//! A stateful graph-computation runtime: user code defines a directed
//! graph of nodes that communicate through named, versioned channels; the
//! engine steps the graph forward in discrete supersteps, persists a
//! checkpoint after every step, and lets callers pause at
//! human-in-the-loop points, update state and resume.
//!
//! ## The execution model
//!
//! Every superstep plans the runnable tasks (nodes whose trigger channels
//! advanced, plus dynamic `Send` tasks), executes them concurrently under
//! a bounded pool, and commits all of their writes in one deterministic
//! barrier pass. Convergence is "no triggered tasks and no pending
//! sends" - cycles are legal and bounded only by the recursion limit.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stategraph_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GraphError> {
//!     let mut graph = StateGraph::new();
//!     graph.add_append_channel("messages");
//!     graph.add_node_fn("agent", |state, _ctx| async move {
//!         let count = state["messages"].as_array().map_or(0, |m| m.len());
//!         Ok(json!({"messages": [format!("reply #{count}")]}))
//!     });
//!     graph.set_entry_point("agent");
//!     graph.set_finish_point("agent");
//!
//!     let compiled = graph
//!         .compile()?
//!         .with_checkpointer(Arc::new(stategraph_checkpoint::MemorySaver::new()));
//!
//!     let outcome = compiled
//!         .invoke(
//!             GraphInput::Values(json!({"messages": ["hi"]})),
//!             RunConfig::for_thread("thread-1"),
//!         )
//!         .await?;
//!     println!("{}", outcome.values);
//!     Ok(())
//! }
//! ```
//!
//! ## Module map
//!
//! - [`graph`] - the [`StateGraph`](graph::StateGraph) builder and
//!   [`CompiledGraph`](graph::compiled::CompiledGraph)
//! - [`pregel`] - planner, commit barrier and the superstep loop
//! - [`node`] - the [`Node`](node::Node) capability and its context
//! - [`command`], [`send`], [`interrupt`] - control flow: explicit
//!   routing, dynamic tasks, human-in-the-loop suspension
//! - [`stream`] - stream modes, events and the multiplexing sender
//! - [`snapshot`] - state reads, updates and history traversal
//! - [`store`] - the cross-thread key/value collaborator
//! - [`retry`], [`config`], [`error`], [`types`] - policies and plumbing

pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod node;
pub mod pregel;
pub mod retry;
pub mod send;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod types;

pub use command::{Command, GotoTarget};
pub use config::{GraphInput, RunConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_RECURSION_LIMIT};
pub use error::{GraphError, Result};
pub use graph::compiled::{CompiledGraph, GraphStream, NodeRunner, NodeSpec};
pub use graph::{ChannelKind, RouterResult, StateGraph};
pub use interrupt::{Interrupt, InterruptNodes, InterruptWhen};
pub use node::{FnNode, Node, NodeContext, NodeError, NodeOutput};
pub use pregel::{LoopStatus, RunOutcome};
pub use retry::RetryPolicy;
pub use send::Send;
pub use snapshot::{StateSnapshot, TaskSnapshot};
pub use store::{MemoryStore, Store, StoreItem};
pub use stream::{EventSender, StreamChunk, StreamEvent, StreamMode};

/// Everything most callers need.
pub mod prelude {
    pub use crate::command::{Command, GotoTarget};
    pub use crate::config::{GraphInput, RunConfig};
    pub use crate::error::GraphError;
    pub use crate::graph::compiled::CompiledGraph;
    pub use crate::graph::{ChannelKind, RouterResult, StateGraph};
    pub use crate::interrupt::InterruptNodes;
    pub use crate::node::{NodeContext, NodeError, NodeOutput};
    pub use crate::pregel::{LoopStatus, RunOutcome};
    pub use crate::send::Send;
    pub use crate::stream::StreamMode;
}
