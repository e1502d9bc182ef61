//! In-memory reference implementation of [`CheckpointSaver`].
//!
//! [`MemorySaver`] keeps per-`(thread, namespace)` insertion-ordered
//! histories behind an async `RwLock`. Every read hands out owned deep
//! copies, so callers mutating a returned tuple can never corrupt stored
//! history - tests rely on this to detect accidental aliasing. Suitable
//! for development, tests and single-process deployments; durable backends
//! implement the same trait.

use crate::checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    PendingWrite,
};
use crate::error::{CheckpointError, Result};
use crate::saver::{CheckpointSaver, ListOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One write slot, keyed for idempotency by `(task_id, idx)`.
#[derive(Debug, Clone)]
struct WriteSlot {
    task_id: String,
    idx: usize,
    channel: String,
    value: Value,
}

/// One stored checkpoint with everything addressed to it.
#[derive(Debug, Clone)]
struct Entry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointConfig,
    parent_config: Option<CheckpointConfig>,
    writes: Vec<WriteSlot>,
}

impl Entry {
    fn to_tuple(&self) -> CheckpointTuple {
        let mut writes = self.writes.clone();
        writes.sort_by(|a, b| (&a.task_id, a.idx).cmp(&(&b.task_id, b.idx)));
        CheckpointTuple {
            config: self.config.clone(),
            checkpoint: self.checkpoint.clone(),
            metadata: self.metadata.clone(),
            parent_config: self.parent_config.clone(),
            pending_writes: writes
                .into_iter()
                .map(|w| PendingWrite {
                    task_id: w.task_id,
                    channel: w.channel,
                    value: w.value,
                })
                .collect(),
        }
    }
}

/// Namespace → insertion-ordered checkpoint history.
type NamespaceHistories = HashMap<String, Vec<Entry>>;

/// Thread-safe in-memory checkpoint storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    storage: Arc<RwLock<HashMap<String, NamespaceHistories>>>,
}

impl MemorySaver {
    /// Create an empty saver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with stored history.
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total checkpoints across all threads and namespaces.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .flat_map(|histories| histories.values())
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop everything. Useful in tests.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

/// Replace every occurrence of `old` with `new` in string leaves of a JSON
/// value. Used when copying a thread so the duplicated history references
/// its new owner.
fn rewrite_strings(value: &mut Value, old: &str, new: &str) {
    match value {
        Value::String(s) => {
            if s.contains(old) {
                *s = s.replace(old, new);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, old, new);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_strings(item, old, new);
            }
        }
        _ => {}
    }
}

/// Deep-rewrite a serializable structure through its JSON form.
fn rewrite<T>(item: &T, old: &str, new: &str) -> Result<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(item)?;
    rewrite_strings(&mut value, old, new);
    Ok(serde_json::from_value(value)?)
}

/// Does this metadata satisfy a `list` filter? Matching compares against
/// the serialized metadata, so `source`, `step` and flattened extras all
/// filter uniformly.
fn metadata_matches(metadata: &CheckpointMetadata, filter: &HashMap<String, Value>) -> bool {
    let serialized = match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => map,
        _ => return false,
    };
    filter
        .iter()
        .all(|(key, expected)| serialized.get(key) == Some(expected))
}

#[async_trait]
impl CheckpointSaver for MemorySaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config.require_thread_id()?;
        let storage = self.storage.read().await;
        let Some(entries) = storage
            .get(thread_id)
            .and_then(|histories| histories.get(&config.checkpoint_ns))
        else {
            return Ok(None);
        };
        let entry = match &config.checkpoint_id {
            Some(id) => entries.iter().find(|e| &e.checkpoint.id == id),
            None => entries.last(),
        };
        Ok(entry.map(Entry::to_tuple))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        options: ListOptions,
    ) -> Result<Vec<CheckpointTuple>> {
        let thread_id = config.require_thread_id()?;
        let storage = self.storage.read().await;
        let Some(entries) = storage
            .get(thread_id)
            .and_then(|histories| histories.get(&config.checkpoint_ns))
        else {
            return Ok(Vec::new());
        };

        // `before` cuts on insertion order, not id ordering.
        let cutoff = match &options.before {
            Some(before_id) => match entries.iter().position(|e| &e.checkpoint.id == before_id) {
                Some(idx) => idx,
                None => entries.len(),
            },
            None => entries.len(),
        };

        let mut results = Vec::new();
        for entry in entries[..cutoff].iter().rev() {
            if let Some(filter) = &options.filter {
                if !metadata_matches(&entry.metadata, filter) {
                    continue;
                }
            }
            results.push(entry.to_tuple());
            if let Some(limit) = options.limit {
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread_id()?.to_string();
        let mut storage = self.storage.write().await;
        let entries = storage
            .entry(thread_id.clone())
            .or_default()
            .entry(config.checkpoint_ns.clone())
            .or_default();

        let stored_config = CheckpointConfig {
            thread_id: Some(thread_id),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
            checkpoint_map: config.checkpoint_map.clone(),
        };
        let parent_config = config
            .checkpoint_id
            .as_ref()
            .map(|parent_id| CheckpointConfig {
                thread_id: stored_config.thread_id.clone(),
                checkpoint_ns: config.checkpoint_ns.clone(),
                checkpoint_id: Some(parent_id.clone()),
                checkpoint_map: config.checkpoint_map.clone(),
            });

        entries.push(Entry {
            checkpoint,
            metadata,
            config: stored_config.clone(),
            parent_config,
            writes: Vec::new(),
        });
        Ok(stored_config)
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
    ) -> Result<()> {
        let thread_id = config.require_thread_id()?;
        let checkpoint_id = config
            .checkpoint_id
            .as_deref()
            .ok_or(CheckpointError::MissingConfig("checkpoint_id"))?;

        let mut storage = self.storage.write().await;
        let entry = storage
            .get_mut(thread_id)
            .and_then(|histories| histories.get_mut(&config.checkpoint_ns))
            .and_then(|entries| {
                entries
                    .iter_mut()
                    .find(|e| e.checkpoint.id == checkpoint_id)
            })
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {checkpoint_id}")))?;

        for (idx, (channel, value)) in writes.into_iter().enumerate() {
            match entry
                .writes
                .iter_mut()
                .find(|slot| slot.task_id == task_id && slot.idx == idx)
            {
                Some(slot) => {
                    slot.channel = channel;
                    slot.value = value;
                }
                None => entry.writes.push(WriteSlot {
                    task_id: task_id.to_string(),
                    idx,
                    channel,
                    value,
                }),
            }
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }

    async fn copy_thread(&self, source_thread_id: &str, target_thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        let Some(histories) = storage.get(source_thread_id).cloned() else {
            return Err(CheckpointError::NotFound(format!(
                "thread {source_thread_id}"
            )));
        };

        let mut copied: NamespaceHistories = HashMap::new();
        for (ns, entries) in histories {
            let mut rewritten = Vec::with_capacity(entries.len());
            for entry in entries {
                rewritten.push(Entry {
                    checkpoint: rewrite(&entry.checkpoint, source_thread_id, target_thread_id)?,
                    metadata: rewrite(&entry.metadata, source_thread_id, target_thread_id)?,
                    config: rewrite(&entry.config, source_thread_id, target_thread_id)?,
                    parent_config: match &entry.parent_config {
                        Some(parent) => {
                            Some(rewrite(parent, source_thread_id, target_thread_id)?)
                        }
                        None => None,
                    },
                    writes: entry.writes.clone(),
                });
            }
            copied.insert(ns, rewritten);
        }
        storage.insert(target_thread_id.to_string(), copied);
        Ok(())
    }

    async fn prune_after(
        &self,
        thread_id: &str,
        boundary_checkpoint_id: Option<&str>,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        let Some(histories) = storage.get_mut(thread_id) else {
            return Ok(());
        };

        match boundary_checkpoint_id {
            None => {
                histories.clear();
            }
            Some(boundary) => {
                // Root namespace truncates after the boundary entry; child
                // namespaces drop anything created after its timestamp.
                let boundary_ts = histories
                    .get("")
                    .and_then(|entries| entries.iter().find(|e| e.checkpoint.id == boundary))
                    .map(|e| e.checkpoint.ts);
                let Some(boundary_ts) = boundary_ts else {
                    return Err(CheckpointError::NotFound(format!(
                        "checkpoint {boundary}"
                    )));
                };

                for (ns, entries) in histories.iter_mut() {
                    if ns.is_empty() {
                        if let Some(idx) = entries.iter().position(|e| e.checkpoint.id == boundary)
                        {
                            entries.truncate(idx + 1);
                        }
                    } else {
                        entries.retain(|e| e.checkpoint.ts <= boundary_ts);
                    }
                }
                histories.retain(|_, entries| !entries.is_empty());
            }
        }
        Ok(())
    }
}
