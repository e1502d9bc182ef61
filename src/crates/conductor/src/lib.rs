//! # conductor - HTTP runtime for stategraph
//!
//! Hosts compiled graphs behind an HTTP API: threads with checkpointed
//! history, a per-thread run queue with multitasking policies
//! (`reject` / `enqueue` / `interrupt` / `rollback`), a versioned
//! assistant registry, a cross-thread store, and a server-sent-events
//! streaming boundary with namespaced subgraph events.
//!
//! ```rust,no_run
//! use conductor::{api, Conductor};
//! use serde_json::json;
//! use stategraph_checkpoint::MemorySaver;
//! use stategraph_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut graph = StateGraph::new();
//!     graph.add_append_channel("messages");
//!     graph.add_node_fn("agent", |_state, _ctx| async move {
//!         Ok(json!({"messages": ["hello"]}))
//!     });
//!     graph.set_entry_point("agent");
//!     graph.set_finish_point("agent");
//!
//!     let conductor = Conductor::new(
//!         Arc::new(MemorySaver::new()),
//!         Arc::new(stategraph_core::MemoryStore::new()),
//!     );
//!     conductor.register_graph("agent", graph.compile()?);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:2024").await?;
//!     axum::serve(listener, api::router(conductor)).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod assistants;
pub mod error;
pub mod runs;
pub mod service;
pub mod sse;
pub mod threads;

pub use assistants::{Assistant, AssistantRegistry};
pub use error::{ConductorError, Result};
pub use runs::{MultitaskStrategy, Run, RunPayload, RunRecord, RunStatus};
pub use service::Conductor;
pub use threads::{Thread, ThreadRegistry, ThreadStatus};
