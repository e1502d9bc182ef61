//! Cross-thread key/value store.
//!
//! The store is a process-wide collaborator shared by all runs: long-term
//! memory that survives individual threads. It is deliberately *not* part
//! of execution state and is never checkpointed - a node reads and writes
//! it through its context, and nothing about it is replayed on resume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Store operation errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Namespace path was empty or contained an empty segment.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Convenience result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// One stored item with provenance timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreItem {
    /// Namespace path the item lives under.
    pub namespace: Vec<String>,
    /// Key within the namespace.
    pub key: String,
    /// The stored value.
    pub value: Value,
    /// First write time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key/value storage shared across threads.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an item.
    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>>;

    /// Insert or replace an item.
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()>;

    /// Delete an item; returns whether it existed.
    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool>;

    /// List items under a namespace prefix, optionally filtered by a
    /// substring match over key and serialized value.
    async fn search(
        &self,
        namespace_prefix: &[String],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoreItem>>;

    /// Distinct namespaces under a prefix.
    async fn list_namespaces(&self, prefix: &[String]) -> Result<Vec<Vec<String>>>;
}

fn validate_namespace(namespace: &[String]) -> Result<()> {
    if namespace.is_empty() || namespace.iter().any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidNamespace(namespace.join("/")));
    }
    Ok(())
}

/// In-memory [`Store`] backed by an ordered map, so namespace listings are
/// deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<(Vec<String>, String), StoreItem>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>> {
        validate_namespace(namespace)?;
        let items = self.items.read();
        Ok(items
            .get(&(namespace.to_vec(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        validate_namespace(namespace)?;
        let now = Utc::now();
        let mut items = self.items.write();
        items
            .entry((namespace.to_vec(), key.to_string()))
            .and_modify(|item| {
                item.value = value.clone();
                item.updated_at = now;
            })
            .or_insert_with(|| StoreItem {
                namespace: namespace.to_vec(),
                key: key.to_string(),
                value,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool> {
        validate_namespace(namespace)?;
        let mut items = self.items.write();
        Ok(items
            .remove(&(namespace.to_vec(), key.to_string()))
            .is_some())
    }

    async fn search(
        &self,
        namespace_prefix: &[String],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoreItem>> {
        let items = self.items.read();
        let mut results = Vec::new();
        for ((namespace, key), item) in items.iter() {
            if !namespace.starts_with(namespace_prefix) {
                continue;
            }
            if let Some(query) = query {
                let haystack = format!("{key} {}", item.value);
                if !haystack.contains(query) {
                    continue;
                }
            }
            results.push(item.clone());
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    async fn list_namespaces(&self, prefix: &[String]) -> Result<Vec<Vec<String>>> {
        let items = self.items.read();
        let mut namespaces: Vec<Vec<String>> = Vec::new();
        for (namespace, _) in items.keys() {
            if !namespace.starts_with(prefix) {
                continue;
            }
            if namespaces.last() != Some(namespace) {
                namespaces.push(namespace.clone());
            }
        }
        namespaces.dedup();
        Ok(namespaces)
    }
}
