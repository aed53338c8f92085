//! Property-graph store used by every pipeline stage.
//!
//! All durable state lives here: repository layout, syntax trees, summaries,
//! documentation and sources/sinks findings. Components receive the store
//! as an `Arc<dyn GraphStore>` and only ever touch the subtree scoped to
//! their own Repository or Investigation.
//!
//! # Backends
//!
//! - [`MemoryGraphStore`] - process-local maps, used by tests and short runs
//! - [`SurrealGraphStore`] - embedded SurrealDB (RocksDB on disk, or in-memory)
//!
//! # Scopes
//!
//! Every node and relationship carries a `scope`: the ingestion id for
//! repository data, the investigation id for sources/sinks data.
//! [`GraphStore::delete_scope`] removes a scope together with every
//! relationship touching one of its nodes.

mod error;
mod memory;
pub mod schema;
mod surreal;

pub use error::GraphError;
pub use memory::MemoryGraphStore;
pub use surreal::SurrealGraphStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Property bag attached to nodes and relationships.
pub type Properties = serde_json::Map<String, Value>;

/// A node as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    pub scope: String,
    pub properties: Properties,
}

impl GraphNode {
    /// Whether the node carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// String property, if present and a string.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer property, if present and numeric.
    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(Value::as_u64)
    }

    /// Boolean property, defaulting to `false`.
    pub fn prop_bool(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A directed, typed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: String,
    pub rel_type: String,
    pub from: String,
    pub to: String,
    pub scope: String,
    pub properties: Properties,
}

/// A node to be written.
///
/// With an explicit `id` the write is a merge: labels are unioned and
/// properties overwritten key by key. Without one a fresh id is generated.
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub id: Option<String>,
    pub labels: Vec<String>,
    pub scope: String,
    pub properties: Properties,
}

impl NodeDraft {
    pub fn new(scope: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: None,
            labels: vec![label.into()],
            scope: scope.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property only when the value is present.
    pub fn optional_property(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.property(key, v),
            None => self,
        }
    }
}

/// A relationship to be written. Ids are derived from the endpoints and
/// type, so writing the same draft twice is a no-op merge.
#[derive(Debug, Clone)]
pub struct RelationshipDraft {
    pub from: String,
    pub to: String,
    pub rel_type: String,
    pub scope: String,
    pub properties: Properties,
}

impl RelationshipDraft {
    pub fn new(
        from: impl Into<String>,
        rel_type: impl Into<String>,
        to: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rel_type: rel_type.into(),
            scope: scope.into(),
            properties: Properties::new(),
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// The id this relationship will be stored under.
    pub fn id(&self) -> String {
        relationship_id(&self.from, &self.rel_type, &self.to)
    }

    fn into_relationship(self) -> GraphRelationship {
        GraphRelationship {
            id: self.id(),
            rel_type: self.rel_type,
            from: self.from,
            to: self.to,
            scope: self.scope,
            properties: self.properties,
        }
    }
}

/// Node selection. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub label: Option<String>,
    pub scopes: Vec<String>,
    pub properties: Vec<(String, Value)>,
}

impl NodeFilter {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn in_scopes(mut self, scopes: &[String]) -> Self {
        self.scopes.extend(scopes.iter().cloned());
        self
    }

    pub fn where_eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Whether a node satisfies this filter.
    pub fn matches(&self, node: &GraphNode) -> bool {
        if let Some(label) = &self.label {
            if !node.has_label(label) {
                return false;
            }
        }
        if !self.scopes.is_empty() && !self.scopes.contains(&node.scope) {
            return false;
        }
        self.properties
            .iter()
            .all(|(key, value)| node.properties.get(key) == Some(value))
    }
}

/// Relationship selection. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub rel_type: Option<String>,
    pub scope: Option<String>,
}

impl RelationshipFilter {
    pub fn of_type(rel_type: impl Into<String>) -> Self {
        Self {
            rel_type: Some(rel_type.into()),
            ..Default::default()
        }
    }

    pub fn from_node(mut self, id: impl Into<String>) -> Self {
        self.from = Some(id.into());
        self
    }

    pub fn to_node(mut self, id: impl Into<String>) -> Self {
        self.to = Some(id.into());
        self
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn matches(&self, rel: &GraphRelationship) -> bool {
        self.from.as_ref().map_or(true, |f| f == &rel.from)
            && self.to.as_ref().map_or(true, |t| t == &rel.to)
            && self.rel_type.as_ref().map_or(true, |t| t == &rel.rel_type)
            && self.scope.as_ref().map_or(true, |s| s == &rel.scope)
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub relationships: usize,
}

/// Contract over a property-graph backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a node, or merge into the existing node when the draft has an id.
    async fn create_node(&self, draft: NodeDraft) -> Result<String, GraphError>;

    /// Fetch a node by id.
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError>;

    /// Overwrite the given properties on an existing node.
    async fn update_properties(&self, id: &str, properties: Properties) -> Result<(), GraphError>;

    /// All nodes matching the filter, ordered by id.
    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>, GraphError>;

    /// Create (or merge) a relationship. Both endpoints must exist.
    async fn create_relationship(&self, draft: RelationshipDraft) -> Result<String, GraphError>;

    /// Write two relationships as one unit: both land or neither does.
    async fn create_relationship_pair(
        &self,
        first: RelationshipDraft,
        second: RelationshipDraft,
    ) -> Result<(String, String), GraphError>;

    /// All relationships matching the filter, ordered by id.
    async fn find_relationships(
        &self,
        filter: &RelationshipFilter,
    ) -> Result<Vec<GraphRelationship>, GraphError>;

    /// Delete every node in `scope` and every relationship in `scope` or
    /// touching one of its nodes.
    async fn delete_scope(&self, scope: &str) -> Result<(), GraphError>;

    /// Node and relationship counts across the whole store.
    async fn stats(&self) -> Result<GraphStats, GraphError>;

    /// Run a backend-native query with named parameters.
    async fn run_query(
        &self,
        _query: &str,
        _params: Properties,
    ) -> Result<Vec<Value>, GraphError> {
        Err(GraphError::Unsupported("native queries".to_string()))
    }
}

/// Deterministic node id for `(scope, label, key)`.
pub fn node_id(scope: &str, label: &str, key: &str) -> String {
    format!("{}-{}", label.to_lowercase(), short_digest(&[scope, label, key]))
}

/// Deterministic relationship id for `(from, type, to)`.
pub fn relationship_id(from: &str, rel_type: &str, to: &str) -> String {
    format!("rel-{}", short_digest(&[from, rel_type, to]))
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..12])
}

/// Merge `incoming` into `existing`, key by key.
fn merge_properties(existing: &mut Properties, incoming: Properties) {
    for (key, value) in incoming {
        existing.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_id_is_deterministic() {
        let a = node_id("scope-1", "File", "src/main.py");
        let b = node_id("scope-1", "File", "src/main.py");
        let c = node_id("scope-2", "File", "src/main.py");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("file-"));
    }

    #[test]
    fn test_relationship_id_depends_on_direction() {
        assert_ne!(
            relationship_id("a", "PART_OF", "b"),
            relationship_id("b", "PART_OF", "a")
        );
    }

    #[test]
    fn test_node_filter_matches() {
        let node = GraphNode {
            id: "n1".to_string(),
            labels: vec!["ASTNode".to_string(), "Function".to_string()],
            scope: "s".to_string(),
            properties: json!({"name": "f"}).as_object().cloned().unwrap_or_default(),
        };

        assert!(NodeFilter::label("Function").matches(&node));
        assert!(NodeFilter::label("ASTNode").in_scope("s").where_eq("name", "f").matches(&node));
        assert!(!NodeFilter::label("File").matches(&node));
        assert!(!NodeFilter::default().in_scope("other").matches(&node));
        assert!(!NodeFilter::default().where_eq("name", "g").matches(&node));
    }

    #[test]
    fn test_draft_builder() {
        let draft = NodeDraft::new("s", "ASTNode")
            .with_label("Function")
            .with_label("Function")
            .property("name", "f")
            .optional_property("signature", None::<String>);
        assert_eq!(draft.labels, vec!["ASTNode", "Function"]);
        assert_eq!(draft.properties.len(), 1);
    }
}
