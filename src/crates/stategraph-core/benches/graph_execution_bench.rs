//! Graph compile and superstep execution benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use stategraph_checkpoint::MemorySaver;
use stategraph_core::prelude::*;
use std::sync::Arc;

fn chain_graph(length: usize) -> StateGraph {
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("count");
    for i in 0..length {
        graph.add_node_fn(format!("node_{i}"), |state: Value, _ctx| async move {
            let count = state["count"].as_i64().unwrap_or(0);
            Ok(json!({"count": count + 1}))
        });
    }
    graph.set_entry_point("node_0");
    for i in 1..length {
        graph.add_edge(format!("node_{}", i - 1), format!("node_{i}"));
    }
    graph.set_finish_point(format!("node_{}", length - 1));
    graph
}

fn compile(c: &mut Criterion) {
    c.bench_function("compile_chain_20", |b| {
        b.iter(|| chain_graph(20).compile().unwrap())
    });
}

fn execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("invoke_chain_10_ephemeral", |b| {
        let compiled = chain_graph(10).compile().unwrap();
        b.to_async(&runtime).iter(|| {
            let compiled = compiled.clone();
            async move {
                compiled
                    .invoke(
                        GraphInput::Values(json!({"count": 0})),
                        RunConfig::default().with_recursion_limit(32),
                    )
                    .await
                    .unwrap()
            }
        })
    });

    c.bench_function("invoke_chain_10_checkpointed", |b| {
        b.to_async(&runtime).iter(|| async {
            let compiled = chain_graph(10)
                .compile()
                .unwrap()
                .with_checkpointer(Arc::new(MemorySaver::new()));
            compiled
                .invoke(
                    GraphInput::Values(json!({"count": 0})),
                    RunConfig::for_thread("bench").with_recursion_limit(32),
                )
                .await
                .unwrap()
        })
    });
}

criterion_group!(benches, compile, execute);
criterion_main!(benches);
