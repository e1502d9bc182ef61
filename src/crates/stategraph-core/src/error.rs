//! Error taxonomy for graph construction and execution.
//!
//! Two families matter to callers:
//!
//! - **Task-attributed errors** ([`GraphError::NodeFailed`]) - a node's own
//!   failure, surfaced after retries are exhausted and once every sibling
//!   task of the step has settled.
//! - **Engine errors** (everything else) - planner, channel, checkpointer
//!   or policy failures that abort the run immediately.
//!
//! Dynamic interrupts are deliberately *not* errors; they travel through
//! the dedicated control variant on `NodeError` (see [`crate::node`]) so
//! retry policies and error taxonomies never misclassify a suspension.

use stategraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Everything that can go wrong while building or running a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure rejected at compile time.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// Run input could not be interpreted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A step produced writes that violate a channel's merge rule - e.g.
    /// two writes to an exclusive channel, or a write to an undeclared
    /// state key. Non-retryable; fails the step.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// A node failed after exhausting its retry policy.
    #[error("node '{node}' failed: {message}")]
    NodeFailed {
        /// The failing node.
        node: String,
        /// The original cause.
        message: String,
    },

    /// The superstep counter exceeded the configured recursion limit.
    #[error("recursion limit of {limit} reached without hitting a stop condition")]
    Recursion {
        /// The limit that was exceeded.
        limit: usize,
    },

    /// One parent node spawned several concurrent subgraph invocations
    /// while a checkpointer is attached; their nested namespaces would
    /// collide.
    #[error("node '{node}' invoked multiple subgraphs concurrently while checkpointing is enabled")]
    MultipleSubgraphs {
        /// The offending parent node.
        node: String,
    },

    /// The run was cooperatively cancelled between supersteps or task
    /// settlements.
    #[error("run cancelled")]
    Cancelled,

    /// Checkpointer failure; propagated as-is.
    #[error("checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CheckpointError> for GraphError {
    fn from(err: CheckpointError) -> Self {
        // Merge-rule violations keep their own identity so callers can
        // tell a user error from a storage failure.
        match err {
            CheckpointError::InvalidUpdate { .. } => GraphError::InvalidUpdate(err.to_string()),
            other => GraphError::Checkpoint(other),
        }
    }
}

impl GraphError {
    /// Stable machine-readable kind, used by the `error` stream event.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::Validation(_) => "validation_error",
            GraphError::InvalidInput(_) => "invalid_input",
            GraphError::InvalidUpdate(_) => "invalid_update",
            GraphError::NodeFailed { .. } => "user_error",
            GraphError::Recursion { .. } => "recursion_limit",
            GraphError::MultipleSubgraphs { .. } => "multiple_subgraphs",
            GraphError::Cancelled => "cancelled",
            GraphError::Checkpoint(_) => "checkpoint_error",
            GraphError::Serialization(_) => "serialization_error",
        }
    }
}
