//! The thread registry.
//!
//! A thread owns a checkpoint history and a status that mirrors the
//! executor: `busy` while a run is active, `interrupted` when the latest
//! checkpoint still has planned tasks, `error` after a failed run, `idle`
//! otherwise.

use crate::error::{ConductorError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::CheckpointSaver;
use std::sync::Arc;
use uuid::Uuid;

/// Executor-derived thread status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// No active run, nothing planned.
    Idle,
    /// A run is executing.
    Busy,
    /// The latest checkpoint has planned tasks waiting for a resume.
    Interrupted,
    /// The last run failed.
    Error,
}

/// One thread record.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    /// Thread id.
    pub thread_id: String,
    /// Caller metadata.
    pub metadata: Value,
    /// Current status.
    pub status: ThreadStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Assistant of the most recent run; state reads resolve the graph
    /// through it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_assistant: Option<String>,
}

/// Registry of threads over a shared checkpointer.
pub struct ThreadRegistry {
    threads: DashMap<String, Thread>,
    saver: Arc<dyn CheckpointSaver>,
}

impl ThreadRegistry {
    /// Create a registry over the shared saver.
    pub fn new(saver: Arc<dyn CheckpointSaver>) -> Self {
        Self {
            threads: DashMap::new(),
            saver,
        }
    }

    /// Create a thread; a random id is minted when none is supplied.
    pub fn create(&self, thread_id: Option<String>, metadata: Value) -> Result<Thread> {
        let thread_id = thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.threads.contains_key(&thread_id) {
            return Err(ConductorError::Conflict(format!(
                "thread '{thread_id}' already exists"
            )));
        }
        let now = Utc::now();
        let thread = Thread {
            thread_id: thread_id.clone(),
            metadata,
            status: ThreadStatus::Idle,
            created_at: now,
            updated_at: now,
            last_assistant: None,
        };
        self.threads.insert(thread_id, thread.clone());
        Ok(thread)
    }

    /// Fetch a thread.
    pub fn get(&self, thread_id: &str) -> Result<Thread> {
        self.threads
            .get(thread_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConductorError::NotFound(format!("thread '{thread_id}'")))
    }

    /// All threads, newest first.
    pub fn list(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self.threads.iter().map(|e| e.value().clone()).collect();
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        threads
    }

    /// Merge metadata into a thread.
    pub fn patch(&self, thread_id: &str, metadata: Value) -> Result<Thread> {
        let mut entry = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ConductorError::NotFound(format!("thread '{thread_id}'")))?;
        if let (Some(current), Some(incoming)) = (entry.metadata.as_object_mut(), metadata.as_object())
        {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        } else {
            entry.metadata = metadata;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Delete a thread and its entire checkpoint history.
    pub async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads
            .remove(thread_id)
            .ok_or_else(|| ConductorError::NotFound(format!("thread '{thread_id}'")))?;
        self.saver.delete_thread(thread_id).await?;
        Ok(())
    }

    /// Copy a thread: duplicate its checkpoint history onto a fresh id,
    /// rewriting the old thread id inside the copied records.
    pub async fn copy(&self, source_thread_id: &str) -> Result<Thread> {
        let source = self.get(source_thread_id)?;
        let target_id = Uuid::new_v4().to_string();
        self.saver
            .copy_thread(source_thread_id, &target_id)
            .await?;
        let now = Utc::now();
        let thread = Thread {
            thread_id: target_id.clone(),
            metadata: source.metadata.clone(),
            status: if source.status == ThreadStatus::Busy {
                // The copy gets the history as-of-now, not the live run.
                ThreadStatus::Interrupted
            } else {
                source.status
            },
            created_at: now,
            updated_at: now,
            last_assistant: source.last_assistant.clone(),
        };
        self.threads.insert(target_id, thread.clone());
        Ok(thread)
    }

    /// Record the assistant whose graph last ran on the thread.
    pub fn set_last_assistant(&self, thread_id: &str, assistant_id: &str) {
        if let Some(mut entry) = self.threads.get_mut(thread_id) {
            entry.last_assistant = Some(assistant_id.to_string());
            entry.updated_at = Utc::now();
        }
    }

    /// Update the executor-derived status.
    pub fn set_status(&self, thread_id: &str, status: ThreadStatus) {
        if let Some(mut entry) = self.threads.get_mut(thread_id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
    }

    /// Assistant to resolve the thread's graph through.
    pub fn graph_assistant(&self, thread_id: &str) -> Result<String> {
        self.get(thread_id)?.last_assistant.ok_or_else(|| {
            ConductorError::Conflict(format!(
                "thread '{thread_id}' has no run history; state is not readable yet"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stategraph_checkpoint::MemorySaver;

    fn registry() -> ThreadRegistry {
        ThreadRegistry::new(Arc::new(MemorySaver::new()))
    }

    #[test]
    fn create_and_patch_metadata() {
        let registry = registry();
        let thread = registry
            .create(Some("t-1".into()), json!({"user": "alice"}))
            .unwrap();
        assert_eq!(thread.status, ThreadStatus::Idle);

        let patched = registry.patch("t-1", json!({"tag": "x"})).unwrap();
        assert_eq!(patched.metadata["user"], "alice");
        assert_eq!(patched.metadata["tag"], "x");
    }

    #[test]
    fn duplicate_ids_conflict() {
        let registry = registry();
        registry.create(Some("t-1".into()), json!({})).unwrap();
        assert!(matches!(
            registry.create(Some("t-1".into()), json!({})),
            Err(ConductorError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_thread() {
        let registry = registry();
        registry.create(Some("t-1".into()), json!({})).unwrap();
        registry.delete("t-1").await.unwrap();
        assert!(matches!(
            registry.get("t-1"),
            Err(ConductorError::NotFound(_))
        ));
    }
}
