//! Definition registry handlers.

use crate::assistants::Assistant;
use crate::error::Result;
use crate::service::Conductor;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

pub async fn list(State(conductor): State<Conductor>) -> Json<Vec<Assistant>> {
    Json(conductor.assistants().list())
}

#[derive(Debug, Deserialize)]
pub struct CreateAssistant {
    pub graph_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

pub async fn create(
    State(conductor): State<Conductor>,
    Json(body): Json<CreateAssistant>,
) -> Result<Json<Assistant>> {
    Ok(Json(conductor.assistants().create(
        &body.graph_id,
        body.name,
        body.config,
        body.metadata,
    )?))
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    pub version: Option<u32>,
}

pub async fn get(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<Assistant>> {
    Ok(Json(conductor.assistants().get(&assistant_id, query.version)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAssistant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn update(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
    Json(body): Json<UpdateAssistant>,
) -> Result<Json<Assistant>> {
    Ok(Json(conductor.assistants().update(
        &assistant_id,
        body.name,
        body.config,
        body.metadata,
    )?))
}

pub async fn delete(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Value>> {
    conductor.assistants().delete(&assistant_id)?;
    Ok(Json(json!({"deleted": assistant_id})))
}

pub async fn versions(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Vec<Assistant>>> {
    Ok(Json(conductor.assistants().versions(&assistant_id)?))
}

pub async fn latest(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Assistant>> {
    Ok(Json(conductor.assistants().latest(&assistant_id)?))
}

pub async fn graph(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Value>> {
    let graph = conductor.assistants().resolve_graph(&assistant_id)?;
    Ok(Json(graph.describe_graph()))
}

pub async fn schemas(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Value>> {
    let graph = conductor.assistants().resolve_graph(&assistant_id)?;
    Ok(Json(graph.describe_channels()))
}

#[derive(Debug, Deserialize)]
pub struct SubgraphQuery {
    #[serde(default)]
    pub recurse: bool,
}

pub async fn subgraphs(
    State(conductor): State<Conductor>,
    Path(assistant_id): Path<String>,
    Query(query): Query<SubgraphQuery>,
) -> Result<Json<Value>> {
    let graph = conductor.assistants().resolve_graph(&assistant_id)?;
    Ok(Json(json!({
        "subgraphs": graph.subgraph_names(query.recurse)
    })))
}
