//! End-to-end engine tests: human-in-the-loop pauses, crash-resume from
//! pending writes, dynamic interrupts with resume values, nested
//! subgraphs, recursion limits and stream ordering.

use serde_json::{json, Value};
use stategraph_checkpoint::{CheckpointConfig, CheckpointSaver, MemorySaver};
use stategraph_core::prelude::*;
use stategraph_core::stream::StreamEvent;
use stategraph_core::types::ERROR_CHANNEL;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Two-node agent/tool loop: `agent` answers "begin" on its first turn and
/// "end" once a tool result is present; the router stops on "end".
fn agent_tool_graph() -> StateGraph {
    let mut graph = StateGraph::new();
    graph.add_append_channel("messages");
    graph.add_node_fn("agent", |state: Value, _ctx| async move {
        let count = state["messages"].as_array().map_or(0, |m| m.len());
        let content = if count <= 1 { "begin" } else { "end" };
        Ok(json!({"messages": [{"type": "ai", "content": content}]}))
    });
    graph.add_node_fn("tool", |_state: Value, _ctx| async move {
        Ok(json!({"messages": [{"type": "tool", "content": "tool_result"}]}))
    });
    graph.set_entry_point("agent");
    graph.add_conditional_edges("agent", |state: &Value| {
        let done = state["messages"]
            .as_array()
            .and_then(|m| m.last())
            .map(|m| m["content"] == "end")
            .unwrap_or(false);
        if done {
            RouterResult::End
        } else {
            RouterResult::Node("tool".into())
        }
    });
    graph.add_edge("tool", "agent");
    graph
}

fn messages_of(values: &Value) -> Vec<String> {
    values["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .map(|m| m["content"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn linear_run_completes() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let outcome = graph
        .invoke(
            GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
            RunConfig::for_thread("t-linear"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(
        messages_of(&outcome.values),
        vec!["foo", "begin", "tool_result", "end"]
    );
    assert!(outcome.next.is_empty());
}

#[tokio::test]
async fn interrupt_before_pauses_then_resume_finishes() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());

    let config = RunConfig::for_thread("t-hitl")
        .with_interrupt_before(InterruptNodes::from_list(["tool"]));
    let paused = graph
        .invoke(
            GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
            config,
        )
        .await
        .unwrap();

    assert_eq!(paused.status, LoopStatus::Interrupted);
    assert_eq!(paused.next, vec!["tool"]);
    assert_eq!(messages_of(&paused.values), vec!["foo", "begin"]);

    // The persisted snapshot agrees with the run outcome.
    let snapshot = graph
        .get_state(&CheckpointConfig::for_thread("t-hitl"), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.next, vec!["tool"]);

    // Resume with no input.
    let resumed = graph
        .invoke(
            GraphInput::Resume,
            RunConfig::for_thread("t-hitl")
                .with_interrupt_before(InterruptNodes::from_list(["tool"])),
        )
        .await
        .unwrap();
    assert_eq!(resumed.status, LoopStatus::Done);
    assert_eq!(
        messages_of(&resumed.values),
        vec!["foo", "begin", "tool_result", "end"]
    );

    let idle = graph
        .get_state(&CheckpointConfig::for_thread("t-hitl"), false)
        .await
        .unwrap()
        .unwrap();
    assert!(idle.next.is_empty());
}

#[tokio::test]
async fn pending_writes_resume_skips_successful_sibling() {
    let saver = Arc::new(MemorySaver::new());
    let one_calls = Arc::new(AtomicUsize::new(0));
    let two_fixed = Arc::new(AtomicBool::new(false));

    let mut graph = StateGraph::new();
    graph.add_channel(
        "total",
        ChannelKind::BinaryOperator(Arc::new(|a: Value, b: Value| {
            json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
        })),
    );
    let calls = one_calls.clone();
    graph.add_node_fn("one", move |_state: Value, _ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"total": 1}))
        }
    });
    let fixed = two_fixed.clone();
    graph.add_node_fn("two", move |_state: Value, _ctx| {
        let fixed = fixed.clone();
        async move {
            if fixed.load(Ordering::SeqCst) {
                Ok(json!({"total": 5}))
            } else {
                Err(NodeError::fatal("two exploded"))
            }
        }
    });
    graph.set_entry_point("one");
    graph.set_entry_point("two");
    graph.set_finish_point("one");
    graph.set_finish_point("two");

    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());
    let input = GraphInput::Values(json!({"total": 0}));

    let err = compiled
        .invoke(input, RunConfig::for_thread("t-pending"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::NodeFailed { ref node, .. } if node == "two"));
    assert_eq!(one_calls.load(Ordering::SeqCst), 1);

    // The failed step left exactly one successful write and one error
    // record, attributed to different tasks.
    let tuple = saver
        .get_tuple(&CheckpointConfig::for_thread("t-pending"))
        .await
        .unwrap()
        .unwrap();
    let successes: Vec<_> = tuple
        .pending_writes
        .iter()
        .filter(|w| !w.channel.starts_with("__"))
        .collect();
    let errors: Vec<_> = tuple
        .pending_writes
        .iter()
        .filter(|w| w.channel == ERROR_CHANNEL)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(errors.len(), 1);
    assert_ne!(successes[0].task_id, errors[0].task_id);

    // Fix the failure and resume: `one` must not run again.
    two_fixed.store(true, Ordering::SeqCst);
    let outcome = compiled
        .invoke(GraphInput::Resume, RunConfig::for_thread("t-pending"))
        .await
        .unwrap();
    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(outcome.values["total"], json!(6));
    assert_eq!(one_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dynamic_interrupt_resumes_with_value() {
    let saver = Arc::new(MemorySaver::new());
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("my_key");
    graph.add_last_value_channel("market");
    graph.add_node_fn("my_node", |state: Value, ctx: NodeContext| async move {
        if state["market"] == "DE" {
            let answer = ctx.interrupt(json!("Just because..."))?;
            Ok(json!({"my_key": answer}))
        } else {
            Ok(json!({}))
        }
    });
    graph.set_entry_point("my_node");
    graph.set_finish_point("my_node");
    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let paused = compiled
        .invoke(
            GraphInput::Values(json!({"my_key": "value", "market": "DE"})),
            RunConfig::for_thread("t-interrupt"),
        )
        .await
        .unwrap();
    assert_eq!(paused.status, LoopStatus::Interrupted);
    assert_eq!(paused.values, json!({"my_key": "value", "market": "DE"}));
    assert_eq!(paused.interrupts.len(), 1);
    assert_eq!(paused.interrupts[0].value, json!("Just because..."));
    assert!(paused.interrupts[0].resumable);

    // Resume over the stream: the only update is the resumed node's.
    let mut stream = compiled.stream(
        GraphInput::Command(Command::resume(json!(" this is great"))),
        RunConfig::for_thread("t-interrupt"),
        vec![StreamMode::Updates],
    );
    let mut updates = Vec::new();
    while let Some(chunk) = stream.chunks.recv().await {
        if let StreamEvent::Updates { updates: payload } = chunk.event {
            updates.push(payload);
        }
    }
    let outcome = stream.handle.await.unwrap().unwrap();
    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(updates, vec![json!({"my_node": {"my_key": " this is great"}})]);
    assert_eq!(outcome.values["my_key"], json!(" this is great"));
}

#[tokio::test]
async fn recursion_limit_raises() {
    let saver = Arc::new(MemorySaver::new());
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("state");
    graph.add_node_fn("a", |_s: Value, _c| async move { Ok(json!({})) });
    graph.add_node_fn("b", |_s: Value, _c| async move { Ok(json!({})) });
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.add_edge("b", "a");
    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let err = compiled
        .invoke(
            GraphInput::Values(json!({"state": 0})),
            RunConfig::for_thread("t-recursion").with_recursion_limit(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Recursion { limit: 1 }));
}

fn inner_graph() -> CompiledGraph {
    let mut child = StateGraph::new();
    child.add_last_value_channel("my_key");
    child.add_node_fn("inner1", |_state: Value, _ctx| async move {
        Ok(json!({"my_key": "hello "}))
    });
    child.add_node_fn("inner2", |state: Value, _ctx| async move {
        let prefix = state["my_key"].as_str().unwrap_or_default();
        Ok(json!({"my_key": format!("{prefix}world")}))
    });
    child.set_entry_point("inner1");
    child.add_edge("inner1", "inner2");
    child.set_finish_point("inner2");
    child
        .compile()
        .unwrap()
        .with_interrupt_before(InterruptNodes::from_list(["inner2"]))
}

#[tokio::test]
async fn nested_subgraph_interrupt_and_resume() {
    let saver = Arc::new(MemorySaver::new());
    let mut parent = StateGraph::new();
    parent.add_last_value_channel("my_key");
    parent.add_subgraph("child", inner_graph());
    parent.set_entry_point("child");
    parent.set_finish_point("child");
    let compiled = parent
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let paused = compiled
        .invoke(
            GraphInput::Values(json!({})),
            RunConfig::for_thread("t-nested"),
        )
        .await
        .unwrap();
    assert_eq!(paused.status, LoopStatus::Interrupted);
    assert_eq!(paused.next, vec!["child"]);

    // The tree snapshot exposes the child's position.
    let snapshot = compiled
        .get_state(&CheckpointConfig::for_thread("t-nested"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.next, vec!["child"]);
    let child_state = snapshot.tasks[0].state.as_ref().expect("child snapshot");
    assert_eq!(child_state.next, vec!["inner2"]);
    assert_eq!(child_state.values["my_key"], json!("hello "));

    let resumed = compiled
        .invoke(GraphInput::Resume, RunConfig::for_thread("t-nested"))
        .await
        .unwrap();
    assert_eq!(resumed.status, LoopStatus::Done);
    assert_eq!(resumed.values["my_key"], json!("hello world"));
}

#[tokio::test]
async fn concurrent_subgraph_invocations_are_rejected() {
    let saver = Arc::new(MemorySaver::new());
    let mut child = StateGraph::new();
    child.add_last_value_channel("my_key");
    child.add_node_fn("inner", |_s: Value, _c| async move { Ok(json!({})) });
    child.set_entry_point("inner");
    child.set_finish_point("inner");
    let child = child.compile().unwrap();

    let mut parent = StateGraph::new();
    parent.add_last_value_channel("my_key");
    parent.add_node_fn("fan", |_s: Value, _c| async move { Ok(json!({})) });
    parent.add_subgraph("sub", child);
    parent.set_entry_point("fan");
    parent.add_conditional_edges("fan", |_state: &Value| {
        RouterResult::Sends(vec![
            Send::new("sub", json!({})),
            Send::new("sub", json!({})),
        ])
    });
    parent.set_finish_point("sub");
    let compiled = parent
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let err = compiled
        .invoke(
            GraphInput::Values(json!({})),
            RunConfig::for_thread("t-fanout"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::MultipleSubgraphs { ref node, .. } if node == "sub"));
}

#[tokio::test]
async fn sends_fan_out_and_aggregate() {
    let saver = Arc::new(MemorySaver::new());
    let mut graph = StateGraph::new();
    graph.add_channel(
        "total",
        ChannelKind::BinaryOperator(Arc::new(|a: Value, b: Value| {
            json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
        })),
    );
    graph.add_node_fn("plan", |_state: Value, _ctx| async move { Ok(json!({})) });
    graph.add_node_fn("worker", |input: Value, _ctx| async move {
        Ok(json!({"total": input["item"].as_i64().unwrap_or(0)}))
    });
    graph.set_entry_point("plan");
    graph.add_conditional_edges("plan", |_state: &Value| {
        RouterResult::Sends(
            (1..=3)
                .map(|item| Send::new("worker", json!({"item": item})))
                .collect(),
        )
    });
    graph.set_finish_point("worker");
    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let outcome = compiled
        .invoke(
            GraphInput::Values(json!({"total": 0})),
            RunConfig::for_thread("t-mapreduce"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(outcome.values["total"], json!(6));
}

#[tokio::test]
async fn writes_to_undeclared_channels_fail_the_step() {
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("known");
    graph.add_node_fn("bad", |_s: Value, _c| async move {
        Ok(json!({"unknown": 1}))
    });
    graph.set_entry_point("bad");
    graph.set_finish_point("bad");
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke(GraphInput::Values(json!({"known": 1})), RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidUpdate(_)));
}

#[tokio::test]
async fn version_monotonicity_along_parent_chain() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());
    graph
        .invoke(
            GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
            RunConfig::for_thread("t-versions"),
        )
        .await
        .unwrap();

    let tuples = saver
        .list(
            &CheckpointConfig::for_thread("t-versions"),
            Default::default(),
        )
        .await
        .unwrap();
    assert!(tuples.len() >= 2);
    for pair in tuples.windows(2) {
        let (newer, older) = (&pair[0].checkpoint, &pair[1].checkpoint);
        for (channel, old_version) in &older.channel_versions {
            let new_version = newer
                .channel_versions
                .get(channel)
                .expect("channel version disappeared");
            assert!(
                new_version >= old_version,
                "version of '{channel}' went backwards"
            );
        }
    }
}

#[tokio::test]
async fn stream_ordering_holds() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let mut stream = graph.stream(
        GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
        RunConfig::for_thread("t-ordering"),
        vec![
            StreamMode::Values,
            StreamMode::Updates,
            StreamMode::Debug,
            StreamMode::Messages,
        ],
    );
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.chunks.recv().await {
        chunks.push(chunk);
    }
    stream.handle.await.unwrap().unwrap();

    assert!(matches!(chunks[0].event, StreamEvent::Metadata { .. }));

    let values_indices: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.event, StreamEvent::Values { .. }))
        .map(|(i, _)| i)
        .collect();
    // One snapshot for the input plus one per executed step.
    assert_eq!(values_indices.len(), 4);
    assert!(matches!(
        chunks.last().unwrap().event,
        StreamEvent::Values { .. }
    ));

    // Every update precedes its step's values snapshot, and the values of
    // step k precede any task event of step k + 1.
    let mut last_values = 0;
    for (index, chunk) in chunks.iter().enumerate() {
        match &chunk.event {
            StreamEvent::Values { .. } => last_values = index,
            StreamEvent::Debug { payload } if payload["type"] == "task_start" => {
                assert!(
                    index > last_values,
                    "task event escaped ahead of the previous step's values"
                );
            }
            _ => {}
        }
    }
    let updates_indices: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.event, StreamEvent::Updates { .. }))
        .map(|(i, _)| i)
        .collect();
    for index in updates_indices {
        assert!(values_indices.iter().any(|v| *v > index));
    }
}

#[tokio::test]
async fn update_state_writes_an_update_checkpoint() {
    let saver = Arc::new(MemorySaver::new());
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("my_key");
    graph.add_node_fn("node", |_s: Value, _c| async move { Ok(json!({})) });
    graph.set_entry_point("node");
    graph.set_finish_point("node");
    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let config = CheckpointConfig::for_thread("t-update");
    compiled
        .update_state(&config, json!({"my_key": "patched"}), None)
        .await
        .unwrap();

    let snapshot = compiled.get_state(&config, false).await.unwrap().unwrap();
    assert_eq!(snapshot.values["my_key"], json!("patched"));
    assert_eq!(
        snapshot.metadata.source,
        Some(stategraph_checkpoint::CheckpointSource::Update)
    );
    assert!(snapshot.next.is_empty());
}

#[tokio::test]
async fn fork_from_historical_checkpoint_branches_history() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());
    graph
        .invoke(
            GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
            RunConfig::for_thread("t-fork"),
        )
        .await
        .unwrap();

    let history = graph
        .get_state_history(&CheckpointConfig::for_thread("t-fork"), Default::default())
        .await
        .unwrap();
    // Oldest entry is the input checkpoint with just the human message.
    let origin = history.last().unwrap();
    assert_eq!(messages_of(&origin.values), vec!["foo"]);

    let fork_point = origin.config.checkpoint_id.clone().unwrap();
    let outcome = graph
        .invoke(
            GraphInput::Resume,
            RunConfig::for_thread("t-fork").with_checkpoint_id(fork_point),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(
        messages_of(&outcome.values),
        vec!["foo", "begin", "tool_result", "end"]
    );
}

#[tokio::test]
async fn interrupt_after_pauses_past_the_committed_step() {
    let saver = Arc::new(MemorySaver::new());
    let graph = agent_tool_graph()
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let paused = graph
        .invoke(
            GraphInput::Values(json!({"messages": [{"type": "human", "content": "foo"}]})),
            RunConfig::for_thread("t-after")
                .with_interrupt_after(InterruptNodes::from_list(["agent"])),
        )
        .await
        .unwrap();
    assert_eq!(paused.status, LoopStatus::Interrupted);
    // The agent's step committed before the pause; its successor is next.
    assert_eq!(messages_of(&paused.values), vec!["foo", "begin"]);
    assert_eq!(paused.next, vec!["tool"]);

    // Resuming runs through; the final agent step matches the setting
    // again but has no successors, so the run completes instead of
    // stranding an unresumable pause.
    let resumed = graph
        .invoke(
            GraphInput::Resume,
            RunConfig::for_thread("t-after")
                .with_interrupt_after(InterruptNodes::from_list(["agent"])),
        )
        .await
        .unwrap();
    assert_eq!(resumed.status, LoopStatus::Done);
    assert_eq!(
        messages_of(&resumed.values),
        vec!["foo", "begin", "tool_result", "end"]
    );
}

#[tokio::test]
async fn retryable_failures_are_retried_with_backoff() {
    use stategraph_core::RetryPolicy;
    use std::time::Duration;

    let attempts = Arc::new(AtomicUsize::new(0));
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("result");
    let counter = attempts.clone();
    graph.add_node_fn("flaky", move |_state: Value, _ctx| {
        let counter = counter.clone();
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(NodeError::failed(format!("transient failure #{attempt}")))
            } else {
                Ok(json!({"result": "recovered"}))
            }
        }
    });
    graph.with_retry(RetryPolicy {
        initial_interval: Duration::from_millis(5),
        backoff_factor: 2.0,
        max_interval: Duration::from_millis(20),
        max_attempts: 3,
        jitter: false,
    });
    graph.set_entry_point("flaky");
    graph.set_finish_point("flaky");
    let compiled = graph.compile().unwrap();

    let outcome = compiled
        .invoke(GraphInput::Values(json!({})), RunConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.values["result"], json!("recovered"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_retryable_failures_fail_immediately() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("result");
    let counter = attempts.clone();
    graph.add_node_fn("fatal", move |_state: Value, _ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Value, _>(NodeError::fatal("configuration is broken"))
        }
    });
    graph.set_entry_point("fatal");
    graph.set_finish_point("fatal");
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke(GraphInput::Values(json!({})), RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::NodeFailed { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn command_goto_routes_without_static_edges() {
    let mut graph = StateGraph::new();
    graph.add_append_channel("log");
    graph.add_node_fn("decide", |_state: Value, _ctx| async move {
        Ok(Command::update(json!({"log": ["decided"]})).with_goto("target"))
    });
    graph.add_node_fn("target", |_state: Value, _ctx| async move {
        Ok(json!({"log": ["reached"]}))
    });
    graph.set_entry_point("decide");
    graph.set_finish_point("target");
    let compiled = graph.compile().unwrap();

    let outcome = compiled
        .invoke(GraphInput::Values(json!({"log": []})), RunConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.values["log"], json!(["decided", "reached"]));
}

#[tokio::test]
async fn subgraph_streams_are_namespaced_when_opted_in() {
    let saver = Arc::new(MemorySaver::new());
    let mut child = StateGraph::new();
    child.add_last_value_channel("my_key");
    child.add_node_fn("inner", |_s: Value, _c| async move {
        Ok(json!({"my_key": "from-child"}))
    });
    child.set_entry_point("inner");
    child.set_finish_point("inner");
    let child = child.compile().unwrap();

    let mut parent = StateGraph::new();
    parent.add_last_value_channel("my_key");
    parent.add_subgraph("child", child);
    parent.set_entry_point("child");
    parent.set_finish_point("child");
    let compiled = parent
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let mut stream = compiled.stream(
        GraphInput::Values(json!({})),
        RunConfig::for_thread("t-ns-stream").with_stream_subgraphs(true),
        vec![StreamMode::Values],
    );
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.chunks.recv().await {
        chunks.push(chunk);
    }
    stream.handle.await.unwrap().unwrap();

    let namespaced: Vec<String> = chunks
        .iter()
        .filter(|chunk| !chunk.ns.is_empty())
        .map(|chunk| chunk.wire_event_name())
        .collect();
    assert!(
        namespaced.iter().any(|name| name.starts_with("values|child:")),
        "expected namespaced child values events, got {namespaced:?}"
    );
    // Root events stay bare.
    assert!(chunks
        .iter()
        .any(|chunk| chunk.ns.is_empty() && chunk.wire_event_name() == "values"));
}

#[tokio::test]
async fn update_state_as_node_fires_its_edges() {
    let saver = Arc::new(MemorySaver::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("my_key");
    graph.add_node_fn("a", |_s: Value, _c| async move { Ok(json!({})) });
    let counter = hits.clone();
    graph.add_node_fn("b", move |_s: Value, _c| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"my_key": "from-b"}))
        }
    });
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.set_finish_point("b");
    let compiled = graph
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let config = CheckpointConfig::for_thread("t-as-node");
    compiled
        .update_state(&config, json!({"my_key": "patched"}), Some("a"))
        .await
        .unwrap();

    // The update, attributed to "a", armed a's successor.
    let snapshot = compiled.get_state(&config, false).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["b"]);

    let outcome = compiled
        .invoke(GraphInput::Resume, RunConfig::for_thread("t-as-node"))
        .await
        .unwrap();
    assert_eq!(outcome.status, LoopStatus::Done);
    assert_eq!(outcome.values["my_key"], json!("from-b"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
