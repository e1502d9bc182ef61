//! # stategraph-checkpoint - state persistence for graph execution
//!
//! Trait-based checkpoint abstractions and the channel algebra underneath
//! the stategraph engine. A checkpoint is a snapshot of every channel's
//! value and version, captured after each superstep; savers persist those
//! snapshots plus the pending writes that make crash-resume possible.
//!
//! ## What lives here
//!
//! - **Channels** - typed state containers with merge semantics:
//!   [`LastValueChannel`], [`TopicChannel`], [`BinaryOperatorChannel`],
//!   [`EphemeralValueChannel`], all behind the [`Channel`] trait.
//! - **Checkpoint model** - [`Checkpoint`], [`CheckpointConfig`],
//!   [`CheckpointMetadata`], [`CheckpointTuple`], [`ChannelVersion`],
//!   [`PendingWrite`].
//! - **Saver capability** - the [`CheckpointSaver`] trait (get/list/put/
//!   put_writes/next_version plus thread maintenance), and [`MemorySaver`]
//!   as the reference implementation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stategraph_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, MemorySaver,
//! };
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = MemorySaver::new();
//!     let config = CheckpointConfig::for_thread("thread-1");
//!
//!     let stored = saver
//!         .put(&config, Checkpoint::empty(), CheckpointMetadata::new(), HashMap::new())
//!         .await?;
//!
//!     let tuple = saver.get_tuple(&stored).await?;
//!     assert!(tuple.is_some());
//!     Ok(())
//! }
//! ```
//!
//! Durable backends (Postgres, SQLite, Redis, …) implement
//! [`CheckpointSaver`] against the same contract; the engine only ever
//! talks to the trait.

pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod saver;

pub use channels::{
    BinaryOperatorChannel, Channel, EphemeralValueChannel, LastValueChannel, Reducer,
    TopicChannel,
};
pub use checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointId,
    CheckpointMetadata, CheckpointSource, CheckpointTuple, PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::MemorySaver;
pub use saver::{CheckpointSaver, ListOptions};
