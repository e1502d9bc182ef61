//! The assistant registry: versioned graph definitions.
//!
//! Graphs are registered programmatically at startup; an implicit
//! assistant (same id as the graph) fronts each one. Creating an
//! assistant binds a name, config and metadata to a graph id; updates
//! push new versions and `latest` pins the newest.

use crate::error::{ConductorError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use stategraph_core::CompiledGraph;
use uuid::Uuid;

/// One version of an assistant.
#[derive(Debug, Clone, Serialize)]
pub struct Assistant {
    /// Stable assistant id across versions.
    pub assistant_id: String,
    /// The registered graph this assistant fronts.
    pub graph_id: String,
    /// Display name.
    pub name: String,
    /// Version number, starting at 1.
    pub version: u32,
    /// Default run configuration merged into each run.
    pub config: Value,
    /// Caller metadata.
    pub metadata: Value,
    /// Creation time of this version.
    pub created_at: DateTime<Utc>,
}

/// Versioned assistant storage over the registered graphs.
pub struct AssistantRegistry {
    graphs: DashMap<String, CompiledGraph>,
    assistants: DashMap<String, Vec<Assistant>>,
}

impl Default for AssistantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            graphs: DashMap::new(),
            assistants: DashMap::new(),
        }
    }

    /// Register a graph and its implicit assistant.
    pub fn register_graph(&self, graph_id: impl Into<String>, graph: CompiledGraph) {
        let graph_id = graph_id.into();
        self.graphs.insert(graph_id.clone(), graph);
        self.assistants
            .entry(graph_id.clone())
            .or_insert_with(|| {
                vec![Assistant {
                    assistant_id: graph_id.clone(),
                    graph_id: graph_id.clone(),
                    name: graph_id.clone(),
                    version: 1,
                    config: Value::Object(Default::default()),
                    metadata: Value::Object(Default::default()),
                    created_at: Utc::now(),
                }]
            });
    }

    /// Ids of the registered graphs.
    pub fn graph_ids(&self) -> Vec<String> {
        self.graphs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Create a new assistant over a registered graph.
    pub fn create(
        &self,
        graph_id: &str,
        name: Option<String>,
        config: Value,
        metadata: Value,
    ) -> Result<Assistant> {
        if !self.graphs.contains_key(graph_id) {
            return Err(ConductorError::NotFound(format!("graph '{graph_id}'")));
        }
        let assistant_id = Uuid::new_v4().to_string();
        let assistant = Assistant {
            assistant_id: assistant_id.clone(),
            graph_id: graph_id.to_string(),
            name: name.unwrap_or_else(|| graph_id.to_string()),
            version: 1,
            config,
            metadata,
            created_at: Utc::now(),
        };
        self.assistants.insert(assistant_id, vec![assistant.clone()]);
        Ok(assistant)
    }

    /// Push a new version of an existing assistant.
    pub fn update(
        &self,
        assistant_id: &str,
        name: Option<String>,
        config: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<Assistant> {
        let mut versions = self
            .assistants
            .get_mut(assistant_id)
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))?;
        let latest = versions.last().expect("assistant with no versions").clone();
        let next = Assistant {
            version: latest.version + 1,
            name: name.unwrap_or(latest.name),
            config: config.unwrap_or(latest.config),
            metadata: metadata.unwrap_or(latest.metadata),
            created_at: Utc::now(),
            ..latest
        };
        versions.push(next.clone());
        Ok(next)
    }

    /// Latest version of an assistant.
    pub fn latest(&self, assistant_id: &str) -> Result<Assistant> {
        self.assistants
            .get(assistant_id)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))
    }

    /// A specific version, or the latest when `version` is `None`.
    pub fn get(&self, assistant_id: &str, version: Option<u32>) -> Result<Assistant> {
        let versions = self
            .assistants
            .get(assistant_id)
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))?;
        let found = match version {
            Some(version) => versions.iter().find(|a| a.version == version).cloned(),
            None => versions.last().cloned(),
        };
        found.ok_or_else(|| {
            ConductorError::NotFound(format!("assistant '{assistant_id}' version {version:?}"))
        })
    }

    /// All versions of an assistant, oldest first.
    pub fn versions(&self, assistant_id: &str) -> Result<Vec<Assistant>> {
        self.assistants
            .get(assistant_id)
            .map(|versions| versions.value().clone())
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))
    }

    /// Latest version of every assistant.
    pub fn list(&self) -> Vec<Assistant> {
        let mut assistants: Vec<Assistant> = self
            .assistants
            .iter()
            .filter_map(|entry| entry.value().last().cloned())
            .collect();
        assistants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        assistants
    }

    /// Delete an assistant and all its versions.
    pub fn delete(&self, assistant_id: &str) -> Result<()> {
        self.assistants
            .remove(assistant_id)
            .map(|_| ())
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))
    }

    /// Resolve the compiled graph behind an assistant id (or a bare graph
    /// id).
    pub fn resolve_graph(&self, assistant_id: &str) -> Result<CompiledGraph> {
        let graph_id = match self.assistants.get(assistant_id) {
            Some(versions) => versions.last().expect("assistant with no versions").graph_id.clone(),
            None => assistant_id.to_string(),
        };
        self.graphs
            .get(&graph_id)
            .map(|graph| graph.value().clone())
            .ok_or_else(|| ConductorError::NotFound(format!("assistant '{assistant_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stategraph_core::prelude::*;

    fn trivial_graph() -> CompiledGraph {
        let mut graph = StateGraph::new();
        graph.add_last_value_channel("state");
        graph.add_node_fn("noop", |_s, _c| async move { Ok(json!({})) });
        graph.set_entry_point("noop");
        graph.set_finish_point("noop");
        graph.compile().unwrap()
    }

    #[test]
    fn registering_a_graph_creates_an_implicit_assistant() {
        let registry = AssistantRegistry::new();
        registry.register_graph("agent", trivial_graph());
        let assistant = registry.latest("agent").unwrap();
        assert_eq!(assistant.version, 1);
        assert_eq!(assistant.graph_id, "agent");
        assert!(registry.resolve_graph("agent").is_ok());
    }

    #[test]
    fn versions_accumulate_and_latest_tracks() {
        let registry = AssistantRegistry::new();
        registry.register_graph("agent", trivial_graph());
        let created = registry
            .create("agent", Some("mine".into()), json!({}), json!({}))
            .unwrap();
        registry
            .update(&created.assistant_id, Some("mine v2".into()), None, None)
            .unwrap();

        let versions = registry.versions(&created.assistant_id).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(registry.latest(&created.assistant_id).unwrap().name, "mine v2");
        assert_eq!(
            registry.get(&created.assistant_id, Some(1)).unwrap().name,
            "mine"
        );
    }

    #[test]
    fn unknown_assistants_are_not_found() {
        let registry = AssistantRegistry::new();
        assert!(matches!(
            registry.latest("ghost"),
            Err(ConductorError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve_graph("ghost"),
            Err(ConductorError::NotFound(_))
        ));
    }
}
