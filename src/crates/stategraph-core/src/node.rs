//! Nodes: the units of work, and the context they run with.
//!
//! A node receives a read-only view of the state channels it declared and
//! returns either a state update or a [`Command`]. Everything else a node
//! can do - read the cross-thread store, stream custom payloads or message
//! chunks, suspend for a human - goes through its [`NodeContext`].
//!
//! # Suspension
//!
//! `ctx.interrupt(value)?` is the human-in-the-loop primitive. On first
//! execution it raises [`NodeError::Interrupt`], a *control* variant the
//! executor records as a resumable suspension - it is never retried and
//! never counted as a failure. When the run is resumed with a matching
//! resume value, the same call returns that value instead of suspending,
//! and execution proceeds past the call site.

use crate::command::Command;
use crate::store::Store;
use crate::stream::{EventSender, StreamEvent};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// How a node invocation ends, other than successfully.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Control-flow suspension raised by `ctx.interrupt(...)`. Not an
    /// error: the task is recorded as interrupted and can be resumed.
    #[error("interrupted")]
    Interrupt(Value),

    /// The node failed. Retried while `retryable` and the task's retry
    /// policy has attempts left.
    #[error("{message}")]
    Failed {
        /// Cause, surfaced on the task and the run.
        message: String,
        /// Whether the retry policy applies.
        retryable: bool,
    },
}

impl NodeError {
    /// A retryable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A terminal failure no retry can fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        NodeError::Failed {
            message: message.into(),
            retryable: false,
        }
    }
}

/// What a node returns.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// A state update: an object of channel writes.
    Update(Value),
    /// A command combining update and explicit routing.
    Command(Command),
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        NodeOutput::Update(value)
    }
}

impl From<Command> for NodeOutput {
    fn from(command: Command) -> Self {
        NodeOutput::Command(command)
    }
}

/// Per-invocation context handed to a node.
#[derive(Clone)]
pub struct NodeContext {
    /// Deterministic id of the running task.
    pub task_id: String,
    /// The node's name.
    pub node: String,
    /// Namespace path of the graph invoking the node.
    pub ns: Vec<String>,
    /// Superstep number.
    pub step: i64,
    /// Per-run configurable values.
    pub configurable: Arc<HashMap<String, Value>>,
    store: Option<Arc<dyn Store>>,
    emitter: Option<EventSender>,
    resume: Option<Value>,
}

impl NodeContext {
    pub(crate) fn new(
        task_id: String,
        node: String,
        ns: Vec<String>,
        step: i64,
        configurable: Arc<HashMap<String, Value>>,
        store: Option<Arc<dyn Store>>,
        emitter: Option<EventSender>,
        resume: Option<Value>,
    ) -> Self {
        Self {
            task_id,
            node,
            ns,
            step,
            configurable,
            store,
            emitter,
            resume,
        }
    }

    /// Suspend the run, surfacing `value` to the caller. Returns the
    /// resume value instead when the run was resumed for this task.
    pub fn interrupt(&self, value: Value) -> Result<Value, NodeError> {
        match &self.resume {
            Some(resume) => Ok(resume.clone()),
            None => Err(NodeError::Interrupt(value)),
        }
    }

    /// The cross-thread store, when one is attached to the graph.
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    /// Emit a payload on the `custom` stream mode.
    pub async fn write_custom(&self, payload: Value) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(StreamEvent::Custom { payload }).await;
        }
    }

    /// Emit a message fragment on the `messages` stream mode.
    pub async fn write_message_chunk(&self, message: Value) {
        if let Some(emitter) = &self.emitter {
            emitter
                .emit(StreamEvent::MessagesPartial {
                    message,
                    metadata: serde_json::json!({
                        "node": self.node,
                        "task_id": self.task_id,
                    }),
                })
                .await;
        }
    }
}

/// The capability every node kind implements: read a state view, produce
/// writes.
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute against a snapshot of the declared input channels.
    async fn run(&self, input: Value, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

type NodeFuture = BoxFuture<'static, Result<NodeOutput, NodeError>>;

/// Adapter turning an async closure into a [`Node`].
pub struct FnNode {
    f: Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>,
}

impl FnNode {
    /// Wrap an async function. The output type converts into
    /// [`NodeOutput`], so closures may return plain update objects or
    /// commands.
    pub fn new<F, Fut, O>(f: F) -> Self
    where
        F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, NodeError>> + Send + 'static,
        O: Into<NodeOutput>,
    {
        Self {
            f: Arc::new(move |input, ctx| {
                let fut = f(input, ctx);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }
}

#[async_trait]
impl Node for FnNode {
    async fn run(&self, input: Value, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.f)(input, ctx).await
    }
}
