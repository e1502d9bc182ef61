//! Channel input/output plumbing: state views, update decomposition and
//! snapshots.

use crate::error::{GraphError, Result};
use crate::graph::compiled::GraphCore;
use serde_json::Value;
use stategraph_checkpoint::Channel;
use std::collections::HashMap;

/// Read the named channels into a state object; empty channels are
/// omitted.
pub fn read_state(
    channels: &HashMap<String, Box<dyn Channel>>,
    keys: &[String],
) -> Value {
    let mut state = serde_json::Map::new();
    for key in keys {
        if let Some(channel) = channels.get(key) {
            if let Ok(value) = channel.get() {
                state.insert(key.clone(), value);
            }
        }
    }
    Value::Object(state)
}

/// Split an update object into per-channel writes. Writing a key that is
/// not a declared state channel is a schema violation.
pub fn decompose_update(update: &Value, core: &GraphCore) -> Result<Vec<(String, Value)>> {
    let Some(object) = update.as_object() else {
        return Err(GraphError::InvalidUpdate(format!(
            "state update must be an object, got {update}"
        )));
    };
    let mut writes = Vec::with_capacity(object.len());
    for (key, value) in object {
        if !core.channels.iter().any(|(name, _)| name == key) {
            return Err(GraphError::InvalidUpdate(format!(
                "'{key}' is not a declared state channel"
            )));
        }
        writes.push((key.clone(), value.clone()));
    }
    Ok(writes)
}

/// State view with one task's own writes applied on top - what a
/// conditional router sees. Works on cloned channels so the live registry
/// is untouched until commit.
pub fn overlay_state(
    channels: &HashMap<String, Box<dyn Channel>>,
    writes: &[(String, Value)],
    keys: &[String],
) -> Result<Value> {
    let mut grouped: HashMap<&str, Vec<Value>> = HashMap::new();
    for (channel, value) in writes {
        if keys.iter().any(|k| k == channel) {
            grouped.entry(channel.as_str()).or_default().push(value.clone());
        }
    }

    let mut state = serde_json::Map::new();
    for key in keys {
        match grouped.remove(key.as_str()) {
            Some(values) => {
                if let Some(channel) = channels.get(key) {
                    let mut scratch = channel.clone_boxed();
                    scratch.update(values)?;
                    if let Ok(value) = scratch.get() {
                        state.insert(key.clone(), value);
                    }
                }
            }
            None => {
                if let Some(channel) = channels.get(key) {
                    if let Ok(value) = channel.get() {
                        state.insert(key.clone(), value);
                    }
                }
            }
        }
    }
    Ok(Value::Object(state))
}

/// Serialize every non-empty channel for the checkpoint.
pub fn snapshot_channels(
    channels: &HashMap<String, Box<dyn Channel>>,
) -> HashMap<String, Value> {
    let mut values = HashMap::new();
    for (name, channel) in channels {
        if let Some(snapshot) = channel.checkpoint() {
            values.insert(name.clone(), snapshot);
        }
    }
    values
}

/// Restore channels from a checkpoint's value map.
pub fn restore_channels(
    channels: &mut HashMap<String, Box<dyn Channel>>,
    values: &HashMap<String, Value>,
) -> Result<()> {
    for (name, snapshot) in values {
        if let Some(channel) = channels.get_mut(name) {
            channel.restore(snapshot.clone())?;
        }
    }
    Ok(())
}
