//! Streaming events: modes, chunks and the multiplexing sender.
//!
//! The engine produces one ordered sequence of [`StreamChunk`]s per run.
//! Subscribers pick one or more [`StreamMode`]s; the sender filters at the
//! source so unwanted modes cost nothing. `metadata` and `error` bypass
//! mode filtering - every subscriber sees the run open and close.
//!
//! Ordering guarantees (per run): chunks are non-decreasing in
//! `(step, intra-step index)`; `metadata` precedes everything; `values`
//! for step `k` is emitted only after step `k`'s checkpoint commit and
//! strictly precedes any chunk of step `k + 1`.
//!
//! Subgraph chunks carry their namespace path. They are forwarded only
//! when the run opted in (`stream_subgraphs`); the HTTP boundary rewrites
//! their wire event name as `mode|segment|…` so the mode stays recoverable
//! from the event name alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What a subscriber wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Full state snapshot after each committed step.
    Values,
    /// Per-node partial writes after each step.
    Updates,
    /// Message traffic: token chunks, completed messages, metadata.
    Messages,
    /// Node lifecycle callback events.
    Events,
    /// Task lifecycle and checkpoint records.
    Debug,
    /// User-emitted payloads from inside nodes.
    Custom,
}

impl StreamMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Values => "values",
            StreamMode::Updates => "updates",
            StreamMode::Messages => "messages",
            StreamMode::Events => "events",
            StreamMode::Debug => "debug",
            StreamMode::Custom => "custom",
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "values" => Some(StreamMode::Values),
            "updates" => Some(StreamMode::Updates),
            "messages" => Some(StreamMode::Messages),
            "events" => Some(StreamMode::Events),
            "debug" => Some(StreamMode::Debug),
            "custom" => Some(StreamMode::Custom),
            _ => None,
        }
    }
}

/// One event in the run's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every run: identifying metadata.
    Metadata {
        /// Run/thread identifiers and caller-supplied metadata.
        metadata: Value,
    },
    /// Full snapshot of the state channels after a committed step.
    Values {
        /// The state object.
        values: Value,
    },
    /// Partial writes of one task, keyed by node name.
    Updates {
        /// `{node: update}` object.
        updates: Value,
    },
    /// A streamed message fragment from inside a node.
    MessagesPartial {
        /// The fragment.
        message: Value,
        /// Origin metadata (node, task id).
        metadata: Value,
    },
    /// A completed message written to the messages channel.
    MessagesComplete {
        /// The message.
        message: Value,
        /// Origin metadata.
        metadata: Value,
    },
    /// Per-task message metadata emitted once the task settles.
    MessagesMetadata {
        /// Origin metadata (node, step).
        metadata: Value,
    },
    /// Node lifecycle callback event.
    Events {
        /// The callback payload.
        event: Value,
    },
    /// Task lifecycle / checkpoint record.
    Debug {
        /// The debug payload.
        payload: Value,
    },
    /// User payload emitted via the node context writer.
    Custom {
        /// The payload, verbatim.
        payload: Value,
    },
    /// Terminal error, emitted before the stream closes.
    Error {
        /// Machine-readable error kind.
        error: String,
        /// Human-readable message.
        message: String,
    },
}

impl StreamEvent {
    /// The mode that gates this event; `None` for metadata/error which are
    /// always forwarded.
    pub fn mode(&self) -> Option<StreamMode> {
        match self {
            StreamEvent::Metadata { .. } | StreamEvent::Error { .. } => None,
            StreamEvent::Values { .. } => Some(StreamMode::Values),
            StreamEvent::Updates { .. } => Some(StreamMode::Updates),
            StreamEvent::MessagesPartial { .. }
            | StreamEvent::MessagesComplete { .. }
            | StreamEvent::MessagesMetadata { .. } => Some(StreamMode::Messages),
            StreamEvent::Events { .. } => Some(StreamMode::Events),
            StreamEvent::Debug { .. } => Some(StreamMode::Debug),
            StreamEvent::Custom { .. } => Some(StreamMode::Custom),
        }
    }

    /// Wire event name, before namespace tagging.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Metadata { .. } => "metadata",
            StreamEvent::Values { .. } => "values",
            StreamEvent::Updates { .. } => "updates",
            StreamEvent::MessagesPartial { .. } => "messages/partial",
            StreamEvent::MessagesComplete { .. } => "messages/complete",
            StreamEvent::MessagesMetadata { .. } => "messages/metadata",
            StreamEvent::Events { .. } => "events",
            StreamEvent::Debug { .. } => "debug",
            StreamEvent::Custom { .. } => "custom",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// The event payload as JSON.
    pub fn data(&self) -> Value {
        match self {
            StreamEvent::Metadata { metadata } => metadata.clone(),
            StreamEvent::Values { values } => values.clone(),
            StreamEvent::Updates { updates } => updates.clone(),
            StreamEvent::MessagesPartial { message, metadata } => {
                serde_json::json!([message, metadata])
            }
            StreamEvent::MessagesComplete { message, metadata } => {
                serde_json::json!([message, metadata])
            }
            StreamEvent::MessagesMetadata { metadata } => metadata.clone(),
            StreamEvent::Events { event } => event.clone(),
            StreamEvent::Debug { payload } => payload.clone(),
            StreamEvent::Custom { payload } => payload.clone(),
            StreamEvent::Error { error, message } => {
                serde_json::json!({"error": error, "message": message})
            }
        }
    }
}

/// An event with the namespace path of the graph that produced it.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Namespace path: empty for the root graph, one `node:hash` segment
    /// per subgraph level.
    pub ns: Vec<String>,
    /// The event.
    pub event: StreamEvent,
}

impl StreamChunk {
    /// Wire event name: bare `mode` at the root, `mode|segment|…` inside a
    /// subgraph.
    pub fn wire_event_name(&self) -> String {
        if self.ns.is_empty() {
            self.event.event_name().to_string()
        } else {
            format!("{}|{}", self.event.event_name(), self.ns.join("|"))
        }
    }
}

/// Mode-filtering, namespace-tagging sender handed to the engine.
///
/// Sends are awaited on a bounded channel, so a slow subscriber exerts
/// backpressure on the run rather than growing an unbounded buffer.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StreamChunk>,
    modes: Arc<HashSet<StreamMode>>,
    subgraphs: bool,
    ns: Vec<String>,
}

impl EventSender {
    /// Create a sender/receiver pair for the given modes.
    pub fn channel(
        modes: Vec<StreamMode>,
        subgraphs: bool,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                modes: Arc::new(modes.into_iter().collect()),
                subgraphs,
                ns: Vec::new(),
            },
            rx,
        )
    }

    /// Is this mode requested by the subscriber?
    pub fn wants(&self, mode: StreamMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Emit an event if its mode is subscribed (metadata/error always
    /// pass). Subgraph senders drop everything unless the run opted into
    /// subgraph streaming.
    pub async fn emit(&self, event: StreamEvent) {
        if !self.ns.is_empty() && !self.subgraphs {
            return;
        }
        if let Some(mode) = event.mode() {
            if !self.modes.contains(&mode) {
                return;
            }
        }
        // A closed receiver just means the subscriber went away; the run
        // keeps going.
        let _ = self
            .tx
            .send(StreamChunk {
                ns: self.ns.clone(),
                event,
            })
            .await;
    }

    /// Derive the sender handed to a subgraph invocation.
    pub fn child(&self, segment: String) -> Self {
        let mut ns = self.ns.clone();
        ns.push(segment);
        Self {
            tx: self.tx.clone(),
            modes: self.modes.clone(),
            subgraphs: self.subgraphs,
            ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sender_filters_modes() {
        let (tx, mut rx) = EventSender::channel(vec![StreamMode::Values], false, 8);
        tx.emit(StreamEvent::Updates {
            updates: json!({"n": 1}),
        })
        .await;
        tx.emit(StreamEvent::Values {
            values: json!({"n": 1}),
        })
        .await;
        drop(tx);

        let only = rx.recv().await.unwrap();
        assert_eq!(only.event.event_name(), "values");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn metadata_and_error_bypass_filtering() {
        let (tx, mut rx) = EventSender::channel(vec![], false, 8);
        tx.emit(StreamEvent::Metadata {
            metadata: json!({"run": 1}),
        })
        .await;
        tx.emit(StreamEvent::Error {
            error: "user_error".into(),
            message: "boom".into(),
        })
        .await;
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().event.event_name(), "metadata");
        assert_eq!(rx.recv().await.unwrap().event.event_name(), "error");
    }

    #[tokio::test]
    async fn subgraph_chunks_require_opt_in() {
        let (tx, mut rx) = EventSender::channel(vec![StreamMode::Values], false, 8);
        tx.child("child:abc123".into())
            .emit(StreamEvent::Values { values: json!({}) })
            .await;
        drop(tx);
        assert!(rx.recv().await.is_none());

        let (tx, mut rx) = EventSender::channel(vec![StreamMode::Values], true, 8);
        tx.child("child:abc123".into())
            .emit(StreamEvent::Values { values: json!({}) })
            .await;
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.wire_event_name(), "values|child:abc123");
    }
}
