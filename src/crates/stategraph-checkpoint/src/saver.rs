//! The [`CheckpointSaver`] capability: pluggable checkpoint persistence.
//!
//! The engine calls the saver at two points in every superstep: once per
//! task settlement (`put_writes`, so a crash never loses completed work)
//! and once at commit (`put`). Loading goes through `get_tuple`, history
//! through `list`. Version tokens are minted by the saver via
//! [`CheckpointSaver::next_version`] so that backends can use their own
//! monotonic shapes.
//!
//! Implementations must be safe for concurrent use across runs; the engine
//! serializes calls per `(thread_id, checkpoint_ns)` but different threads
//! and namespaces overlap freely. All saver errors propagate to the run -
//! the engine never declares a step complete before `put` has returned.

use crate::checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata,
    CheckpointTuple,
};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Options for [`CheckpointSaver::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum number of tuples to return.
    pub limit: Option<usize>,
    /// Return only checkpoints recorded before this checkpoint id.
    pub before: Option<String>,
    /// Require these metadata key/value pairs to match.
    pub filter: Option<HashMap<String, Value>>,
}

impl ListOptions {
    /// Limit the number of returned tuples.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only return checkpoints older than the given id.
    pub fn with_before(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.before = Some(checkpoint_id.into());
        self
    }

    /// Filter on checkpoint metadata.
    pub fn with_filter(mut self, filter: HashMap<String, Value>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Persistence backend for checkpoints and pending writes.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch the checkpoint addressed by `config` - a specific id when
    /// `checkpoint_id` is set, otherwise the latest in the namespace.
    /// Returns `None` when the thread or checkpoint does not exist.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints for `(thread_id, checkpoint_ns)`, newest first.
    async fn list(
        &self,
        config: &CheckpointConfig,
        options: ListOptions,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Persist a checkpoint. `config` addresses the parent position (its
    /// `checkpoint_id`, when set, becomes the new checkpoint's parent).
    /// Returns the config addressing the stored checkpoint.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig>;

    /// Persist writes produced by one task against the checkpoint
    /// addressed by `config` (which must carry a `checkpoint_id`).
    /// Idempotent per `(checkpoint_id, task_id, index)`: re-persisting the
    /// same slot replaces rather than duplicates, so retried steps cannot
    /// inflate history.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
    ) -> Result<()>;

    /// Mint the next version token for a channel. Must be strictly greater
    /// than `current`. The default increments integer tokens.
    fn next_version(&self, current: Option<&ChannelVersion>, _channel: &str) -> ChannelVersion {
        match current {
            None => ChannelVersion::Int(1),
            Some(ChannelVersion::Int(n)) => ChannelVersion::Int(n + 1),
            Some(ChannelVersion::Str(s)) => {
                // Lexicographic successor: appending any character sorts
                // strictly after the prefix.
                ChannelVersion::Str(format!("{s}0"))
            }
        }
    }

    /// Remove every checkpoint and pending write of a thread, across all
    /// namespaces.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Duplicate a thread's full history onto a new thread id, rewriting
    /// every occurrence of the source id inside copied configs and
    /// metadata.
    async fn copy_thread(&self, source_thread_id: &str, target_thread_id: &str) -> Result<()>;

    /// Delete checkpoints recorded after a boundary: root-namespace
    /// checkpoints newer than `boundary_checkpoint_id` (all of them when
    /// `None`), and child-namespace checkpoints created after the
    /// boundary's timestamp. Backs the `rollback` multitasking strategy.
    async fn prune_after(
        &self,
        thread_id: &str,
        boundary_checkpoint_id: Option<&str>,
    ) -> Result<()>;
}
