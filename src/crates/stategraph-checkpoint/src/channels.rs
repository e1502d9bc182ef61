//! Channel algebra: typed state containers with merge semantics.
//!
//! A channel is a slot the engine writes into at step commit and reads from
//! when building node inputs. Each kind encodes one merge rule:
//!
//! - [`LastValueChannel`] - exclusive slot; at most one write per step,
//!   replaces the previous value. The default for plain state keys.
//! - [`TopicChannel`] - ordered accumulation of every write, optionally
//!   deduplicated, optionally cleared each step it is consumed.
//! - [`BinaryOperatorChannel`] - folds writes and the accumulated value
//!   with an associative operator.
//! - [`EphemeralValueChannel`] - write-only signaling; the value is
//!   visible for exactly one step and cleared on consumption.
//!
//! Channels do not track their own versions. The engine owns versioning in
//! the checkpoint and asks the saver for the next token whenever
//! `update`/`consume` report a change.

use crate::error::{CheckpointError, Result};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Behavior shared by every channel kind.
pub trait Channel: Send + Sync + Debug {
    /// Merge a batch of writes produced within one step. The batch order
    /// follows deterministic task ordering. Returns `true` when the
    /// channel's state changed.
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    /// Current value, or `EmptyChannel` if nothing was ever written (or
    /// the value was consumed).
    fn get(&self) -> Result<Value>;

    /// Whether [`Channel::get`] would succeed.
    fn is_available(&self) -> bool;

    /// Serializable snapshot of the channel state; `None` when empty so
    /// that empty channels are omitted from checkpoints.
    fn checkpoint(&self) -> Option<Value>;

    /// Restore from a snapshot previously produced by
    /// [`Channel::checkpoint`].
    fn restore(&mut self, snapshot: Value) -> Result<()>;

    /// Notify the channel that a subscriber consumed it this step.
    /// Returns `true` when the channel's state changed.
    fn consume(&mut self) -> bool {
        false
    }

    /// Clone into a boxed trait object.
    fn clone_boxed(&self) -> Box<dyn Channel>;
}

impl Clone for Box<dyn Channel> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Exclusive slot: at most one write per step, last write replaces.
#[derive(Debug, Clone, Default)]
pub struct LastValueChannel {
    name: String,
    value: Option<Value>,
}

impl LastValueChannel {
    /// Create an empty channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Create a channel seeded with a value.
    pub fn with_value(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }
}

impl Channel for LastValueChannel {
    fn update(&mut self, mut values: Vec<Value>) -> Result<bool> {
        match values.len() {
            0 => Ok(false),
            1 => {
                self.value = values.pop();
                Ok(true)
            }
            n => Err(CheckpointError::invalid_update(
                &self.name,
                format!("received {n} writes in one step, expected at most one"),
            )),
        }
    }

    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel(self.name.clone()))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn clone_boxed(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Ordered accumulation of writes.
///
/// With `dedup`, a write equal to one already accumulated is dropped. With
/// `consume_each_step`, the sequence is cleared whenever the engine
/// consumes it at a step boundary.
#[derive(Debug, Clone)]
pub struct TopicChannel {
    name: String,
    values: Vec<Value>,
    dedup: bool,
    consume_each_step: bool,
}

impl TopicChannel {
    /// Create an accumulating topic that is never cleared.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            dedup: false,
            consume_each_step: false,
        }
    }

    /// Drop writes already present in the accumulated sequence.
    pub fn with_dedup(mut self) -> Self {
        self.dedup = true;
        self
    }

    /// Clear the sequence each step it is consumed.
    pub fn consumed_each_step(mut self) -> Self {
        self.consume_each_step = true;
        self
    }

    /// The accumulated sequence.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Channel for TopicChannel {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let before = self.values.len();
        for value in values {
            if self.dedup && self.values.contains(&value) {
                continue;
            }
            self.values.push(value);
        }
        Ok(self.values.len() != before)
    }

    fn get(&self) -> Result<Value> {
        if self.values.is_empty() {
            return Err(CheckpointError::EmptyChannel(self.name.clone()));
        }
        Ok(Value::Array(self.values.clone()))
    }

    fn is_available(&self) -> bool {
        !self.values.is_empty()
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.values.is_empty() {
            None
        } else {
            Some(Value::Array(self.values.clone()))
        }
    }

    fn restore(&mut self, snapshot: Value) -> Result<()> {
        match snapshot {
            Value::Array(values) => {
                self.values = values;
                Ok(())
            }
            other => Err(CheckpointError::CorruptSnapshot {
                channel: self.name.clone(),
                reason: format!("expected array, got {other}"),
            }),
        }
    }

    fn consume(&mut self) -> bool {
        if self.consume_each_step && !self.values.is_empty() {
            self.values.clear();
            true
        } else {
            false
        }
    }

    fn clone_boxed(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// An associative fold operator for [`BinaryOperatorChannel`].
pub type Reducer = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Folds every write into an accumulated value with an associative
/// operator.
#[derive(Clone)]
pub struct BinaryOperatorChannel {
    name: String,
    value: Option<Value>,
    reducer: Reducer,
}

impl BinaryOperatorChannel {
    /// Create a channel with a custom operator.
    pub fn new<F>(name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            value: None,
            reducer: Arc::new(reducer),
        }
    }

    /// Create a channel with a shared operator.
    pub fn with_reducer(name: impl Into<String>, reducer: Reducer) -> Self {
        Self {
            name: name.into(),
            value: None,
            reducer,
        }
    }

    /// Numeric sum operator.
    pub fn sum(name: impl Into<String>) -> Self {
        Self::new(name, |a, b| {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            serde_json::json!(a + b)
        })
    }

    /// Array concatenation operator; non-array operands are lifted.
    pub fn append(name: impl Into<String>) -> Self {
        Self::new(name, |a, b| {
            let mut out = match a {
                Value::Array(items) => items,
                other => vec![other],
            };
            match b {
                Value::Array(items) => out.extend(items),
                other => out.push(other),
            }
            Value::Array(out)
        })
    }
}

impl Debug for BinaryOperatorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryOperatorChannel")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Channel for BinaryOperatorChannel {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let mut acc = self.value.take();
        for value in values {
            acc = Some(match acc {
                Some(current) => (self.reducer)(current, value),
                None => value,
            });
        }
        self.value = acc;
        Ok(true)
    }

    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel(self.name.clone()))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn clone_boxed(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Write-only signal: the value is visible for the step after it was
/// written and cleared once consumed.
#[derive(Debug, Clone, Default)]
pub struct EphemeralValueChannel {
    name: String,
    value: Option<Value>,
}

impl EphemeralValueChannel {
    /// Create an empty signal channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl Channel for EphemeralValueChannel {
    fn update(&mut self, mut values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        // Multiple signals within one step collapse to the last one.
        self.value = values.pop();
        Ok(true)
    }

    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel(self.name.clone()))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn consume(&mut self) -> bool {
        self.value.take().is_some()
    }

    fn clone_boxed(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_value_replaces() {
        let mut channel = LastValueChannel::new("status");
        assert!(!channel.is_available());
        assert!(channel.update(vec![json!("a")]).unwrap());
        assert_eq!(channel.get().unwrap(), json!("a"));
        assert!(channel.update(vec![json!("b")]).unwrap());
        assert_eq!(channel.get().unwrap(), json!("b"));
    }

    #[test]
    fn last_value_rejects_concurrent_writes() {
        let mut channel = LastValueChannel::new("status");
        let err = channel.update(vec![json!(1), json!(2)]).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidUpdate { .. }));
    }

    #[test]
    fn last_value_ignores_empty_batch() {
        let mut channel = LastValueChannel::new("status");
        assert!(!channel.update(vec![]).unwrap());
        assert!(!channel.is_available());
    }

    #[test]
    fn topic_accumulates_in_order() {
        let mut channel = TopicChannel::new("log");
        channel.update(vec![json!(1), json!(2)]).unwrap();
        channel.update(vec![json!(3)]).unwrap();
        assert_eq!(channel.get().unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn topic_dedup_drops_repeats() {
        let mut channel = TopicChannel::new("log").with_dedup();
        channel.update(vec![json!("x"), json!("x")]).unwrap();
        let changed = channel.update(vec![json!("x")]).unwrap();
        assert!(!changed);
        assert_eq!(channel.get().unwrap(), json!(["x"]));
    }

    #[test]
    fn topic_consumption_clears() {
        let mut channel = TopicChannel::new("inbox").consumed_each_step();
        channel.update(vec![json!("a")]).unwrap();
        assert!(channel.consume());
        assert!(!channel.is_available());
        assert!(!channel.consume());
    }

    #[test]
    fn binary_operator_folds_across_steps() {
        let mut channel = BinaryOperatorChannel::sum("total");
        channel.update(vec![json!(1.0), json!(2.0)]).unwrap();
        channel.update(vec![json!(3.0)]).unwrap();
        assert_eq!(channel.get().unwrap(), json!(6.0));
    }

    #[test]
    fn ephemeral_clears_on_consume() {
        let mut channel = EphemeralValueChannel::new("signal");
        channel.update(vec![json!(true)]).unwrap();
        assert!(channel.is_available());
        assert!(channel.consume());
        assert!(!channel.is_available());
    }

    #[test]
    fn snapshots_roundtrip() {
        let mut topic = TopicChannel::new("log");
        topic.update(vec![json!(1), json!(2)]).unwrap();
        let snap = topic.checkpoint().unwrap();

        let mut restored = TopicChannel::new("log");
        restored.restore(snap).unwrap();
        assert_eq!(restored.get().unwrap(), json!([1, 2]));

        let empty = LastValueChannel::new("none");
        assert!(empty.checkpoint().is_none());
    }

    #[test]
    fn topic_restore_rejects_non_array() {
        let mut topic = TopicChannel::new("log");
        assert!(topic.restore(json!({"bad": true})).is_err());
    }
}
