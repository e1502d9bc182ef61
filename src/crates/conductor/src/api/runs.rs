//! Run lifecycle handlers: create, wait, stream, join, cancel.

use crate::error::{ConductorError, Result};
use crate::runs::{RunPayload, RunRecord, RunStatus};
use crate::service::Conductor;
use crate::sse::run_sse_stream;
use axum::extract::{Path, Query, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CreateRun {
    pub assistant_id: String,
    #[serde(flatten)]
    pub payload: RunPayload,
}

pub async fn create(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Json(body): Json<CreateRun>,
) -> Result<Json<RunRecord>> {
    // Background runs default to waiting their turn; synchronous `wait`
    // and `stream` keep the service default (reject on conflict).
    let mut payload = body.payload;
    payload.multitask_strategy = payload
        .multitask_strategy
        .or(Some(crate::runs::MultitaskStrategy::Enqueue));
    let run = conductor.create_run(&thread_id, &body.assistant_id, payload)?;
    Ok(Json(run.record()))
}

/// Create a run and block until it settles, returning the final values.
pub async fn wait(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Json(body): Json<CreateRun>,
) -> Result<Json<Value>> {
    let run = conductor.create_run(&thread_id, &body.assistant_id, body.payload)?;
    let run_id = run.id();
    let (status, output) = conductor.join_run(&run_id).await?;
    Ok(Json(json!({
        "run_id": run_id,
        "status": status,
        "values": output,
    })))
}

/// Create a run and stream its events as SSE.
pub async fn stream(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Json(body): Json<CreateRun>,
) -> Result<Sse<impl tokio_stream::Stream<Item = std::result::Result<axum::response::sse::Event, std::convert::Infallible>>>>
{
    let run = conductor.create_run(&thread_id, &body.assistant_id, body.payload)?;
    Ok(Sse::new(run_sse_stream(run)).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<RunStatus>,
}

pub async fn list(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RunRecord>>> {
    conductor.threads().get(&thread_id)?;
    Ok(Json(
        conductor.runs().list_for_thread(&thread_id, query.status),
    ))
}

pub async fn get(
    State(conductor): State<Conductor>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> Result<Json<RunRecord>> {
    let run = conductor
        .runs()
        .get(&run_id)
        .filter(|run| run.record().thread_id == thread_id)
        .ok_or_else(|| ConductorError::NotFound(format!("run '{run_id}'")))?;
    Ok(Json(run.record()))
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    /// `interrupt` (default) leaves the run interrupted; `rollback`
    /// deletes it and rewinds its checkpoints.
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn cancel(
    State(conductor): State<Conductor>,
    Path((_thread_id, run_id)): Path<(String, String)>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Value>> {
    let rollback = query.action.as_deref() == Some("rollback");
    conductor.cancel_run(&run_id, rollback).await?;
    Ok(Json(json!({"cancelled": run_id, "rollback": rollback})))
}

pub async fn join(
    State(conductor): State<Conductor>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>> {
    let (status, output) = conductor.join_run(&run_id).await?;
    Ok(Json(json!({
        "run_id": run_id,
        "status": status,
        "values": output,
    })))
}

/// Attach to an existing run's stream; buffered history replays first.
pub async fn join_stream(
    State(conductor): State<Conductor>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = std::result::Result<axum::response::sse::Event, std::convert::Infallible>>>>
{
    let run = conductor
        .runs()
        .get(&run_id)
        .ok_or_else(|| ConductorError::NotFound(format!("run '{run_id}'")))?;
    Ok(Sse::new(run_sse_stream(run)).keep_alive(KeepAlive::default()))
}
