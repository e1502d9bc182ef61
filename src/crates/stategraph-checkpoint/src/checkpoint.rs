//! Core checkpoint data structures.
//!
//! A [`Checkpoint`] is an immutable snapshot of all channel values and their
//! versions, captured after every superstep. Checkpoints are addressed by a
//! [`CheckpointConfig`] - `(thread_id, checkpoint_ns, checkpoint_id)` - and
//! annotated with [`CheckpointMetadata`] recording how they came to be
//! (`input`, `loop`, `update` or `fork`), their step number and their
//! parents. A [`CheckpointTuple`] bundles a checkpoint together with its
//! config, metadata, parent config and any pending writes persisted before
//! the step committed.
//!
//! # Version tracking
//!
//! Every channel carries a [`ChannelVersion`] in `channel_versions`,
//! strictly increasing each time the channel is written. `versions_seen`
//! records, per node, the last version of each trigger channel the node
//! consumed; a node is due to run when a trigger channel's current version
//! exceeds what the node has seen. This pair of maps is the entire
//! scheduling state of the engine - the checkpoint is self-contained.
//!
//! # Pending sends
//!
//! Dynamic `Send` descriptors produced during a step are carried on the
//! checkpoint (`pending_sends`) so they survive interrupts and crashes, and
//! are consumed exactly once by the step that next plans from the
//! checkpoint. The descriptors are opaque JSON at this layer; the engine
//! owns their shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type.
pub type CheckpointId = String;

/// Mapping from channel name to version.
pub type ChannelVersions = HashMap<String, ChannelVersion>;

/// A totally ordered, monotonically increasing channel version token.
///
/// Integer versions order numerically; string versions order
/// lexicographically. An integer always orders before a string so that a
/// backend switching token shapes cannot move versions backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelVersion {
    /// Numeric version, the default shape.
    Int(u64),
    /// Lexicographic version for backends with string tokens.
    Str(String),
}

impl ChannelVersion {
    /// The version every channel implicitly starts at.
    pub fn null() -> Self {
        ChannelVersion::Int(0)
    }
}

impl PartialOrd for ChannelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ChannelVersion::Int(a), ChannelVersion::Int(b)) => a.cmp(b),
            (ChannelVersion::Str(a), ChannelVersion::Str(b)) => a.cmp(b),
            (ChannelVersion::Int(_), ChannelVersion::Str(_)) => Ordering::Less,
            (ChannelVersion::Str(_), ChannelVersion::Int(_)) => Ordering::Greater,
        }
    }
}

/// How a checkpoint came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created by applying run input, before any node executed.
    Input,
    /// Created by a superstep commit inside the engine loop.
    Loop,
    /// Created by an external state update.
    Update,
    /// Created by copying another checkpoint onto a new thread.
    Fork,
}

/// Metadata attached to every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// The origin of the checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Step number: `-1` for the input checkpoint, `0` for the first loop
    /// commit, `n` for the nth afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Checkpoint ids of ancestors, keyed by checkpoint namespace. For a
    /// subgraph checkpoint this records where each enclosing graph stood
    /// when the child was spawned.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parents: HashMap<String, CheckpointId>,

    /// Caller-supplied metadata, merged flat into the serialized form.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source.
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number.
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the ancestor map.
    pub fn with_parents(mut self, parents: HashMap<String, CheckpointId>) -> Self {
        self.parents = parents;
        self
    }

    /// Add one custom metadata entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// An immutable snapshot of all channel state at a step boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version.
    pub v: i32,

    /// Unique checkpoint id.
    pub id: CheckpointId,

    /// Creation timestamp.
    pub ts: DateTime<Utc>,

    /// Serialized value of every non-empty channel.
    pub channel_values: HashMap<String, serde_json::Value>,

    /// Current version of every channel that has ever been written.
    pub channel_versions: ChannelVersions,

    /// Per node, the last version of each trigger channel it consumed.
    pub versions_seen: HashMap<String, ChannelVersions>,

    /// Dynamic task descriptors deferred to the next planned step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_sends: Vec<serde_json::Value>,
}

impl Checkpoint {
    /// Current checkpoint format version.
    pub const FORMAT_VERSION: i32 = 1;

    /// Create an empty checkpoint with a fresh id.
    pub fn empty() -> Self {
        Self {
            v: Self::FORMAT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            channel_values: HashMap::new(),
            channel_versions: HashMap::new(),
            versions_seen: HashMap::new(),
            pending_sends: Vec::new(),
        }
    }

    /// Derive the successor checkpoint: same state maps, fresh id and
    /// timestamp. The caller mutates the copy before persisting it.
    pub fn next(&self) -> Self {
        Self {
            v: self.v,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            channel_values: self.channel_values.clone(),
            channel_versions: self.channel_versions.clone(),
            versions_seen: self.versions_seen.clone(),
            pending_sends: self.pending_sends.clone(),
        }
    }

    /// Highest version across all channels, if any channel was written.
    pub fn max_version(&self) -> Option<&ChannelVersion> {
        self.channel_versions.values().max()
    }
}

/// Address of a checkpoint: thread, namespace and optionally a specific id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointConfig {
    /// Thread the checkpoint belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Checkpoint namespace; empty for the root graph, colon-joined
    /// segments for nested subgraphs.
    #[serde(default)]
    pub checkpoint_ns: String,

    /// Specific checkpoint id; `None` addresses the latest in the
    /// namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    /// Ancestor checkpoint ids keyed by namespace, recorded when a
    /// subgraph is spawned.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub checkpoint_map: HashMap<String, CheckpointId>,
}

impl CheckpointConfig {
    /// Config addressing the latest root-namespace checkpoint of a thread.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    /// Set the checkpoint namespace.
    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = ns.into();
        self
    }

    /// Pin a specific checkpoint id.
    pub fn with_checkpoint_id(mut self, id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }

    /// Set the ancestor checkpoint map.
    pub fn with_checkpoint_map(mut self, map: HashMap<String, CheckpointId>) -> Self {
        self.checkpoint_map = map;
        self
    }

    /// Thread id, or a `MissingConfig` error.
    pub fn require_thread_id(&self) -> crate::error::Result<&str> {
        self.thread_id
            .as_deref()
            .ok_or(crate::error::CheckpointError::MissingConfig("thread_id"))
    }
}

/// A write persisted by a task before its step committed.
///
/// Pending writes let a resumed run skip tasks that already succeeded: the
/// recorded writes are replayed instead of re-invoking the task function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Task that produced the write.
    pub task_id: String,
    /// Target channel.
    pub channel: String,
    /// Written value.
    pub value: serde_json::Value,
}

/// A checkpoint joined with everything needed to resume from it.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Address of this checkpoint.
    pub config: CheckpointConfig,
    /// The snapshot itself.
    pub checkpoint: Checkpoint,
    /// Its metadata.
    pub metadata: CheckpointMetadata,
    /// Address of the parent checkpoint, if any.
    pub parent_config: Option<CheckpointConfig>,
    /// Writes persisted against this checkpoint before the next commit.
    pub pending_writes: Vec<PendingWrite>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_checkpoint_has_fresh_identity() {
        let a = Checkpoint::empty();
        let b = Checkpoint::empty();
        assert_eq!(a.v, Checkpoint::FORMAT_VERSION);
        assert_ne!(a.id, b.id);
        assert!(a.channel_values.is_empty());
        assert!(a.pending_sends.is_empty());
    }

    #[test]
    fn next_copies_state_with_new_identity() {
        let mut a = Checkpoint::empty();
        a.channel_versions
            .insert("messages".into(), ChannelVersion::Int(3));
        let b = a.next();
        assert_ne!(a.id, b.id);
        assert_eq!(b.channel_versions.get("messages"), Some(&ChannelVersion::Int(3)));
    }

    #[test]
    fn versions_order_totally() {
        assert!(ChannelVersion::Int(2) > ChannelVersion::Int(1));
        assert!(ChannelVersion::Str("b".into()) > ChannelVersion::Str("a".into()));
        assert!(ChannelVersion::Str("0".into()) > ChannelVersion::Int(u64::MAX));
        assert!(ChannelVersion::null() < ChannelVersion::Int(1));
    }

    #[test]
    fn metadata_builder_roundtrips() {
        let meta = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("run_id", serde_json::json!("r-1"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], "input");
        assert_eq!(json["step"], -1);
        assert_eq!(json["run_id"], "r-1");
        let back: CheckpointMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.step, Some(-1));
        assert_eq!(back.extra.get("run_id"), Some(&serde_json::json!("r-1")));
    }

    #[test]
    fn config_requires_thread_id() {
        let config = CheckpointConfig::default();
        assert!(config.require_thread_id().is_err());
        let config = CheckpointConfig::for_thread("t-1");
        assert_eq!(config.require_thread_id().unwrap(), "t-1");
    }
}
