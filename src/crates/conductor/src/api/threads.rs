//! Thread lifecycle, state and history handlers.

use crate::error::Result;
use crate::service::Conductor;
use crate::threads::Thread;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use stategraph_checkpoint::ListOptions;
use stategraph_core::StateSnapshot;

#[derive(Debug, Deserialize)]
pub struct CreateThread {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

pub async fn create(
    State(conductor): State<Conductor>,
    Json(body): Json<CreateThread>,
) -> Result<Json<Thread>> {
    Ok(Json(
        conductor.threads().create(body.thread_id, body.metadata)?,
    ))
}

pub async fn list(State(conductor): State<Conductor>) -> Json<Vec<Thread>> {
    Json(conductor.threads().list())
}

pub async fn get(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>> {
    Ok(Json(conductor.threads().get(&thread_id)?))
}

#[derive(Debug, Deserialize)]
pub struct PatchThread {
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

pub async fn patch(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Json(body): Json<PatchThread>,
) -> Result<Json<Thread>> {
    Ok(Json(conductor.threads().patch(&thread_id, body.metadata)?))
}

pub async fn delete(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
) -> Result<Json<Value>> {
    conductor.delete_thread(&thread_id).await?;
    Ok(Json(json!({"deleted": thread_id})))
}

pub async fn copy(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>> {
    Ok(Json(conductor.threads().copy(&thread_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    #[serde(default)]
    pub subgraphs: bool,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

pub async fn state(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateSnapshot>> {
    Ok(Json(
        conductor
            .thread_state(&thread_id, query.checkpoint_id, query.subgraphs)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateState {
    pub values: Value,
    #[serde(default)]
    pub as_node: Option<String>,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

pub async fn update_state(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Json(body): Json<UpdateState>,
) -> Result<Json<Value>> {
    let stored = conductor
        .update_thread_state(
            &thread_id,
            body.values,
            body.as_node.as_deref(),
            body.checkpoint_id,
        )
        .await?;
    Ok(Json(json!({"checkpoint": stored})))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub before: Option<String>,
}

pub async fn history(
    State(conductor): State<Conductor>,
    Path(thread_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StateSnapshot>>> {
    let options = ListOptions {
        limit: query.limit,
        before: query.before,
        filter: None,
    };
    Ok(Json(conductor.thread_history(&thread_id, options).await?))
}
