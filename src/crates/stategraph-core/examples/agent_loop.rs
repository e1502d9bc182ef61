//! A minimal agent/tool loop with a human-in-the-loop pause.
//!
//! Run it:
//!
//! ```bash
//! cargo run -p stategraph-core --example agent_loop
//! ```
//!
//! The graph pauses before the `tool` node, prints the snapshot a caller
//! would inspect, then resumes to completion.

use serde_json::{json, Value};
use stategraph_checkpoint::{CheckpointConfig, MemorySaver};
use stategraph_core::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), GraphError> {
    let mut graph = StateGraph::new();
    graph.add_append_channel("messages");
    graph.add_node_fn("agent", |state: Value, _ctx| async move {
        let count = state["messages"].as_array().map_or(0, |m| m.len());
        let content = if count <= 1 {
            "let me look that up"
        } else {
            "the answer is 42"
        };
        Ok(json!({"messages": [{"type": "ai", "content": content}]}))
    });
    graph.add_node_fn("tool", |_state: Value, _ctx| async move {
        Ok(json!({"messages": [{"type": "tool", "content": "search results"}]}))
    });
    graph.set_entry_point("agent");
    graph.add_conditional_edges("agent", |state: &Value| {
        let answered = state["messages"]
            .as_array()
            .and_then(|m| m.last())
            .map(|m| m["content"] == "the answer is 42")
            .unwrap_or(false);
        if answered {
            RouterResult::End
        } else {
            RouterResult::Node("tool".into())
        }
    });
    graph.add_edge("tool", "agent");

    let compiled = graph
        .compile()?
        .with_checkpointer(Arc::new(MemorySaver::new()));

    let config = RunConfig::for_thread("demo")
        .with_interrupt_before(InterruptNodes::from_list(["tool"]));
    let paused = compiled
        .invoke(
            GraphInput::Values(json!({
                "messages": [{"type": "human", "content": "what is the answer?"}]
            })),
            config,
        )
        .await?;
    println!("paused before: {:?}", paused.next);

    let snapshot = compiled
        .get_state(&CheckpointConfig::for_thread("demo"), false)
        .await?
        .expect("thread has state");
    println!("state at the pause: {}", snapshot.values);

    let finished = compiled
        .invoke(GraphInput::Resume, RunConfig::for_thread("demo"))
        .await?;
    println!("final state: {}", finished.values);
    Ok(())
}
