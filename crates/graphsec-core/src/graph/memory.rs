//! In-process graph store.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    merge_properties, GraphError, GraphNode, GraphRelationship, GraphStats, GraphStore,
    NodeDraft, NodeFilter, Properties, RelationshipDraft, RelationshipFilter,
};

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, GraphNode>,
    relationships: BTreeMap<String, GraphRelationship>,
}

impl Inner {
    fn upsert_node(&mut self, draft: NodeDraft) -> String {
        let id = draft
            .id
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4().simple()));

        match self.nodes.get_mut(&id) {
            Some(existing) => {
                for label in draft.labels {
                    if !existing.labels.contains(&label) {
                        existing.labels.push(label);
                    }
                }
                merge_properties(&mut existing.properties, draft.properties);
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    GraphNode {
                        id: id.clone(),
                        labels: draft.labels,
                        scope: draft.scope,
                        properties: draft.properties,
                    },
                );
            }
        }
        id
    }

    fn check_endpoints(&self, draft: &RelationshipDraft) -> Result<(), GraphError> {
        for end in [&draft.from, &draft.to] {
            if !self.nodes.contains_key(end) {
                return Err(GraphError::MissingEndpoint(end.clone()));
            }
        }
        Ok(())
    }

    fn upsert_relationship(&mut self, draft: RelationshipDraft) -> String {
        let rel = draft.into_relationship();
        let id = rel.id.clone();
        match self.relationships.get_mut(&id) {
            Some(existing) => merge_properties(&mut existing.properties, rel.properties),
            None => {
                self.relationships.insert(id.clone(), rel);
            }
        }
        id
    }
}

/// Graph store backed by ordered maps behind a lock.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn create_node(&self, draft: NodeDraft) -> Result<String, GraphError> {
        Ok(self.inner.write().upsert_node(draft))
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        Ok(self.inner.read().nodes.get(id).cloned())
    }

    async fn update_properties(&self, id: &str, properties: Properties) -> Result<(), GraphError> {
        let mut inner = self.inner.write();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        merge_properties(&mut node.properties, properties);
        Ok(())
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>, GraphError> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    async fn create_relationship(&self, draft: RelationshipDraft) -> Result<String, GraphError> {
        let mut inner = self.inner.write();
        inner.check_endpoints(&draft)?;
        Ok(inner.upsert_relationship(draft))
    }

    async fn create_relationship_pair(
        &self,
        first: RelationshipDraft,
        second: RelationshipDraft,
    ) -> Result<(String, String), GraphError> {
        let mut inner = self.inner.write();
        inner.check_endpoints(&first)?;
        inner.check_endpoints(&second)?;
        let a = inner.upsert_relationship(first);
        let b = inner.upsert_relationship(second);
        Ok((a, b))
    }

    async fn find_relationships(
        &self,
        filter: &RelationshipFilter,
    ) -> Result<Vec<GraphRelationship>, GraphError> {
        Ok(self
            .inner
            .read()
            .relationships
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn delete_scope(&self, scope: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.write();
        let gone: BTreeSet<String> = inner
            .nodes
            .values()
            .filter(|n| n.scope == scope)
            .map(|n| n.id.clone())
            .collect();

        inner.nodes.retain(|id, _| !gone.contains(id));
        inner.relationships.retain(|_, r| {
            r.scope != scope && !gone.contains(&r.from) && !gone.contains(&r.to)
        });
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, GraphError> {
        let inner = self.inner.read();
        Ok(GraphStats {
            nodes: inner.nodes.len(),
            relationships: inner.relationships.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::schema;

    #[tokio::test]
    async fn test_merge_on_explicit_id() {
        let store = MemoryGraphStore::new();
        store
            .create_node(NodeDraft::new("s", schema::FILE).with_id("f1").property("a", 1))
            .await
            .unwrap();
        store
            .create_node(
                NodeDraft::new("s", schema::FILE)
                    .with_id("f1")
                    .with_label("Extra")
                    .property("b", 2),
            )
            .await
            .unwrap();

        let node = store.get_node("f1").await.unwrap().unwrap();
        assert_eq!(node.labels, vec!["File", "Extra"]);
        assert_eq!(node.prop_u64("a"), Some(1));
        assert_eq!(node.prop_u64("b"), Some(2));
        assert_eq!(store.stats().await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = MemoryGraphStore::new();
        store.create_node(NodeDraft::new("s", "A").with_id("a")).await.unwrap();

        let err = store
            .create_relationship(RelationshipDraft::new("a", schema::CALLS, "missing", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingEndpoint(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_pair_is_all_or_nothing() {
        let store = MemoryGraphStore::new();
        store.create_node(NodeDraft::new("s", "A").with_id("a")).await.unwrap();
        store.create_node(NodeDraft::new("s", "B").with_id("b")).await.unwrap();

        let result = store
            .create_relationship_pair(
                RelationshipDraft::new("a", schema::PART_OF, "b", "s"),
                RelationshipDraft::new("b", schema::DEFINES, "ghost", "s"),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.stats().await.unwrap().relationships, 0);
    }

    #[tokio::test]
    async fn test_delete_scope_removes_touching_edges() {
        let store = MemoryGraphStore::new();
        store.create_node(NodeDraft::new("repo", "File").with_id("f")).await.unwrap();
        store.create_node(NodeDraft::new("inv", "Source").with_id("src")).await.unwrap();
        store
            .create_relationship(RelationshipDraft::new("src", schema::IDENTIFIES, "f", "inv"))
            .await
            .unwrap();

        store.delete_scope("repo").await.unwrap();

        assert!(store.get_node("f").await.unwrap().is_none());
        assert!(store.get_node("src").await.unwrap().is_some());
        assert_eq!(store.stats().await.unwrap().relationships, 0);
    }
}
