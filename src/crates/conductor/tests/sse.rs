//! Streaming wire tests: SSE event naming (including namespaced subgraph
//! variants), ordering on the wire, and history replay for late joiners.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use conductor::{api, Conductor};
use serde_json::{json, Value};
use stategraph_checkpoint::MemorySaver;
use stategraph_core::prelude::*;
use stategraph_core::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

fn service() -> Conductor {
    let conductor = Conductor::new(Arc::new(MemorySaver::new()), Arc::new(MemoryStore::new()));

    let mut flat = StateGraph::new();
    flat.add_append_channel("messages");
    flat.add_node_fn("agent", |_state: Value, _ctx| async move {
        Ok(json!({"messages": [{"type": "ai", "content": "reply"}]}))
    });
    flat.set_entry_point("agent");
    flat.set_finish_point("agent");
    conductor.register_graph("agent", flat.compile().unwrap());

    let mut child = StateGraph::new();
    child.add_last_value_channel("my_key");
    child.add_node_fn("inner", |_state: Value, _ctx| async move {
        Ok(json!({"my_key": "from-child"}))
    });
    child.set_entry_point("inner");
    child.set_finish_point("inner");

    let mut parent = StateGraph::new();
    parent.add_last_value_channel("my_key");
    parent.add_subgraph("child", child.compile().unwrap());
    parent.set_entry_point("child");
    parent.set_finish_point("child");
    conductor.register_graph("parent", parent.compile().unwrap());

    conductor
}

fn app(conductor: &Conductor) -> Router {
    api::router(conductor.clone())
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Event names in wire order.
fn event_names(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn run_stream_emits_metadata_first_then_values() {
    let conductor = service();
    let app = app(&conductor);
    app.clone()
        .oneshot(request(
            Method::POST,
            "/threads",
            Some(json!({"thread_id": "t-sse"})),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/threads/t-sse/runs/stream",
            Some(json!({
                "assistant_id": "agent",
                "input": {"messages": [{"type": "human", "content": "hi"}]},
                "stream_mode": ["values", "updates"],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let body = body_text(response).await;
    let names = event_names(&body);
    assert_eq!(names.first().map(String::as_str), Some("metadata"));
    assert_eq!(names.last().map(String::as_str), Some("values"));
    // Updates for the step precede its values snapshot.
    let update_pos = names.iter().position(|n| n == "updates").unwrap();
    let last_values = names.iter().rposition(|n| n == "values").unwrap();
    assert!(update_pos < last_values);
}

#[tokio::test]
async fn subgraph_events_are_rewritten_with_namespace_tags() {
    let conductor = service();
    let app = app(&conductor);
    app.clone()
        .oneshot(request(
            Method::POST,
            "/threads",
            Some(json!({"thread_id": "t-sse-ns"})),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/threads/t-sse-ns/runs/stream",
            Some(json!({
                "assistant_id": "parent",
                "input": {},
                "stream_mode": ["values"],
                "stream_subgraphs": true,
            })),
        ))
        .await
        .unwrap();
    let body = body_text(response).await;
    let names = event_names(&body);

    // The mode is recoverable from the event name alone: bare at the
    // root, `mode|segment` inside the child.
    assert!(names.iter().any(|n| n == "values"));
    assert!(
        names
            .iter()
            .any(|n| n.starts_with("values|child:")),
        "expected namespaced child events, got {names:?}"
    );

    // Without the opt-in the child events disappear from the wire.
    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/threads/t-sse-ns/runs/stream",
            Some(json!({
                "assistant_id": "parent",
                "input": {},
                "stream_mode": ["values"],
            })),
        ))
        .await
        .unwrap();
    let names = event_names(&body_text(response).await);
    assert!(names.iter().all(|n| !n.contains('|')), "got {names:?}");
}

#[tokio::test]
async fn join_stream_replays_the_full_history_after_completion() {
    let conductor = service();
    conductor
        .threads()
        .create(Some("t-replay".into()), json!({}))
        .unwrap();
    let run = conductor
        .create_run(
            "t-replay",
            "agent",
            conductor::RunPayload {
                input: Some(json!({"messages": [{"type": "human", "content": "hi"}]})),
                ..Default::default()
            },
        )
        .unwrap();
    conductor.join_run(&run.id()).await.unwrap();

    // The run is long settled; a late joiner still sees the whole
    // ordered sequence.
    let app = app(&conductor);
    let response = app
        .oneshot(request(
            Method::GET,
            &format!("/runs/{}/stream", run.id()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let names = event_names(&body_text(response).await);
    assert_eq!(names.first().map(String::as_str), Some("metadata"));
    assert!(names.contains(&"values".to_string()));
}

#[tokio::test]
async fn error_events_surface_on_the_wire_before_close() {
    let conductor = service();
    let mut graph = StateGraph::new();
    graph.add_last_value_channel("state");
    graph.add_node_fn("boom", |_state: Value, _ctx| async move {
        Err::<Value, _>(NodeError::fatal("exploded"))
    });
    graph.set_entry_point("boom");
    graph.set_finish_point("boom");
    conductor.register_graph("boom", graph.compile().unwrap());

    let app = app(&conductor);
    app.clone()
        .oneshot(request(
            Method::POST,
            "/threads",
            Some(json!({"thread_id": "t-err"})),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/threads/t-err/runs/stream",
            Some(json!({"assistant_id": "boom", "input": {"state": 1}})),
        ))
        .await
        .unwrap();
    let body = body_text(response).await;
    let names = event_names(&body);
    assert_eq!(names.last().map(String::as_str), Some("error"));
    assert!(body.contains("user_error"));
}
