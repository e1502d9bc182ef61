//! Cross-thread store handlers: `/store/{namespace…}/{key}` plus search
//! and namespace listing.

use crate::error::{ConductorError, Result};
use crate::service::Conductor;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use stategraph_core::StoreItem;

/// Split a `/store/a/b/key` wildcard tail into `(namespace, key)`.
fn split_path(path: &str) -> Result<(Vec<String>, String)> {
    let mut segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    if segments.len() < 2 {
        return Err(ConductorError::Invalid(
            "store paths need at least a namespace and a key".into(),
        ));
    }
    let key = segments.pop().expect("checked above");
    Ok((segments, key))
}

#[derive(Debug, Deserialize)]
pub struct PutItem {
    pub value: Value,
}

pub async fn put(
    State(conductor): State<Conductor>,
    Path(path): Path<String>,
    Json(body): Json<PutItem>,
) -> Result<Json<Value>> {
    let (namespace, key) = split_path(&path)?;
    conductor
        .store()
        .put(&namespace, &key, body.value)
        .await
        .map_err(|err| ConductorError::Invalid(err.to_string()))?;
    Ok(Json(json!({"namespace": namespace, "key": key})))
}

pub async fn get(
    State(conductor): State<Conductor>,
    Path(path): Path<String>,
) -> Result<Json<StoreItem>> {
    let (namespace, key) = split_path(&path)?;
    conductor
        .store()
        .get(&namespace, &key)
        .await
        .map_err(|err| ConductorError::Invalid(err.to_string()))?
        .map(Json)
        .ok_or_else(|| ConductorError::NotFound(format!("store item '{path}'")))
}

pub async fn delete(
    State(conductor): State<Conductor>,
    Path(path): Path<String>,
) -> Result<Json<Value>> {
    let (namespace, key) = split_path(&path)?;
    let existed = conductor
        .store()
        .delete(&namespace, &key)
        .await
        .map_err(|err| ConductorError::Invalid(err.to_string()))?;
    if !existed {
        return Err(ConductorError::NotFound(format!("store item '{path}'")));
    }
    Ok(Json(json!({"deleted": path})))
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub namespace_prefix: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn search(
    State(conductor): State<Conductor>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Vec<StoreItem>>> {
    let items = conductor
        .store()
        .search(&body.namespace_prefix, body.query.as_deref(), body.limit)
        .await
        .map_err(|err| ConductorError::Invalid(err.to_string()))?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct NamespacesQuery {
    /// Slash-separated namespace prefix.
    #[serde(default)]
    pub prefix: Option<String>,
}

pub async fn namespaces(
    State(conductor): State<Conductor>,
    Query(query): Query<NamespacesQuery>,
) -> Result<Json<Vec<Vec<String>>>> {
    let prefix: Vec<String> = query
        .prefix
        .as_deref()
        .unwrap_or_default()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    let namespaces = conductor
        .store()
        .list_namespaces(&prefix)
        .await
        .map_err(|err| ConductorError::Invalid(err.to_string()))?;
    Ok(Json(namespaces))
}
