//! Embedded SurrealDB graph store.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tokio::sync::Mutex;

use super::{
    merge_properties, GraphError, GraphNode, GraphRelationship, GraphStats, GraphStore,
    NodeDraft, NodeFilter, Properties, RelationshipDraft, RelationshipFilter,
};

const SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS graph_node SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS graph_node_uid ON graph_node FIELDS uid UNIQUE;
    DEFINE INDEX IF NOT EXISTS graph_node_scope ON graph_node FIELDS scope;
    DEFINE TABLE IF NOT EXISTS graph_edge SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS graph_edge_uid ON graph_edge FIELDS uid UNIQUE;
    DEFINE INDEX IF NOT EXISTS graph_edge_from ON graph_edge FIELDS from_uid;
    DEFINE INDEX IF NOT EXISTS graph_edge_to ON graph_edge FIELDS to_uid;
    DEFINE INDEX IF NOT EXISTS graph_edge_scope ON graph_edge FIELDS scope;
"#;

/// Stored node row. Properties travel as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRow {
    uid: String,
    labels: Vec<String>,
    scope: String,
    props: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRow {
    uid: String,
    rel_type: String,
    from_uid: String,
    to_uid: String,
    scope: String,
    props: String,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

impl NodeRow {
    fn from_node(node: &GraphNode) -> Result<Self, GraphError> {
        Ok(Self {
            uid: node.id.clone(),
            labels: node.labels.clone(),
            scope: node.scope.clone(),
            props: encode_props(&node.properties)?,
        })
    }

    fn into_node(self) -> Result<GraphNode, GraphError> {
        let properties = decode_props(&self.uid, &self.props)?;
        Ok(GraphNode {
            id: self.uid,
            labels: self.labels,
            scope: self.scope,
            properties,
        })
    }
}

impl EdgeRow {
    fn from_relationship(rel: &GraphRelationship) -> Result<Self, GraphError> {
        Ok(Self {
            uid: rel.id.clone(),
            rel_type: rel.rel_type.clone(),
            from_uid: rel.from.clone(),
            to_uid: rel.to.clone(),
            scope: rel.scope.clone(),
            props: encode_props(&rel.properties)?,
        })
    }

    fn into_relationship(self) -> Result<GraphRelationship, GraphError> {
        let properties = decode_props(&self.uid, &self.props)?;
        Ok(GraphRelationship {
            id: self.uid,
            rel_type: self.rel_type,
            from: self.from_uid,
            to: self.to_uid,
            scope: self.scope,
            properties,
        })
    }
}

fn encode_props(props: &Properties) -> Result<String, GraphError> {
    serde_json::to_string(props).map_err(|e| GraphError::Database(e.to_string()))
}

fn decode_props(id: &str, raw: &str) -> Result<Properties, GraphError> {
    serde_json::from_str(raw).map_err(|e| GraphError::Corrupted {
        id: id.to_string(),
        message: e.to_string(),
    })
}

/// Graph store on embedded SurrealDB.
pub struct SurrealGraphStore {
    db: Surreal<Db>,
    /// Serializes read-modify-write merges.
    write_lock: Mutex<()>,
}

impl SurrealGraphStore {
    /// Open or create a RocksDB-backed store at the given path.
    pub async fn open(path: &Path) -> Result<Self, GraphError> {
        let db = Surreal::new::<RocksDb>(path).await?;
        Self::init(db).await
    }

    /// Open a volatile in-memory store.
    pub async fn in_memory() -> Result<Self, GraphError> {
        let db = Surreal::new::<Mem>(()).await?;
        Self::init(db).await
    }

    async fn init(db: Surreal<Db>) -> Result<Self, GraphError> {
        db.use_ns("graphsec").use_db("graph").await?;
        db.query(SCHEMA).await?.check()?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    async fn fetch_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        let row: Option<NodeRow> = self
            .db
            .query("SELECT uid, labels, scope, props FROM graph_node WHERE uid = $uid LIMIT 1")
            .bind(("uid", id.to_string()))
            .await?
            .take(0)?;
        row.map(NodeRow::into_node).transpose()
    }

    async fn fetch_edge(&self, id: &str) -> Result<Option<GraphRelationship>, GraphError> {
        let row: Option<EdgeRow> = self
            .db
            .query(
                "SELECT uid, rel_type, from_uid, to_uid, scope, props FROM graph_edge WHERE uid = $uid LIMIT 1",
            )
            .bind(("uid", id.to_string()))
            .await?
            .take(0)?;
        row.map(EdgeRow::into_relationship).transpose()
    }

    async fn write_node(&self, node: &GraphNode) -> Result<(), GraphError> {
        let row = NodeRow::from_node(node)?;
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE graph_node WHERE uid = $uid; \
                 CREATE graph_node CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("uid", row.uid.clone()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    /// Merge a relationship into its stored form, if any.
    async fn merged_edge(&self, draft: RelationshipDraft) -> Result<EdgeRow, GraphError> {
        let incoming = draft.into_relationship();
        let merged = match self.fetch_edge(&incoming.id).await? {
            Some(mut existing) => {
                merge_properties(&mut existing.properties, incoming.properties);
                existing
            }
            None => incoming,
        };
        EdgeRow::from_relationship(&merged)
    }

    async fn check_endpoints(&self, draft: &RelationshipDraft) -> Result<(), GraphError> {
        for end in [&draft.from, &draft.to] {
            if self.fetch_node(end).await?.is_none() {
                return Err(GraphError::MissingEndpoint(end.clone()));
            }
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<usize, GraphError> {
        let query = format!("SELECT count() FROM {} GROUP ALL", table);
        let row: Option<CountRow> = self.db.query(&query).await?.take(0)?;
        Ok(row.map(|r| r.count.max(0) as usize).unwrap_or(0))
    }
}

#[async_trait]
impl GraphStore for SurrealGraphStore {
    async fn create_node(&self, draft: NodeDraft) -> Result<String, GraphError> {
        let _guard = self.write_lock.lock().await;
        let id = draft
            .id
            .clone()
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4().simple()));

        let node = match self.fetch_node(&id).await? {
            Some(mut existing) => {
                for label in draft.labels {
                    if !existing.labels.contains(&label) {
                        existing.labels.push(label);
                    }
                }
                merge_properties(&mut existing.properties, draft.properties);
                existing
            }
            None => GraphNode {
                id: id.clone(),
                labels: draft.labels,
                scope: draft.scope,
                properties: draft.properties,
            },
        };

        self.write_node(&node).await?;
        Ok(id)
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        self.fetch_node(id).await
    }

    async fn update_properties(&self, id: &str, properties: Properties) -> Result<(), GraphError> {
        let _guard = self.write_lock.lock().await;
        let mut node = self
            .fetch_node(id)
            .await?
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        merge_properties(&mut node.properties, properties);
        self.write_node(&node).await
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>, GraphError> {
        let mut query = String::from("SELECT uid, labels, scope, props FROM graph_node");
        let mut clauses = Vec::new();
        if filter.label.is_some() {
            clauses.push("labels CONTAINS $label");
        }
        if !filter.scopes.is_empty() {
            clauses.push("scope INSIDE $scopes");
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY uid");

        let rows: Vec<NodeRow> = self
            .db
            .query(&query)
            .bind(("label", filter.label.clone().unwrap_or_default()))
            .bind(("scopes", filter.scopes.clone()))
            .await?
            .take(0)?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let node = row.into_node()?;
            // Property predicates are evaluated on decoded JSON.
            if filter.matches(&node) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn create_relationship(&self, draft: RelationshipDraft) -> Result<String, GraphError> {
        let _guard = self.write_lock.lock().await;
        self.check_endpoints(&draft).await?;
        let row = self.merged_edge(draft).await?;
        let id = row.uid.clone();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE graph_edge WHERE uid = $uid; \
                 CREATE graph_edge CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("uid", id.clone()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(id)
    }

    async fn create_relationship_pair(
        &self,
        first: RelationshipDraft,
        second: RelationshipDraft,
    ) -> Result<(String, String), GraphError> {
        let _guard = self.write_lock.lock().await;
        self.check_endpoints(&first).await?;
        self.check_endpoints(&second).await?;
        let a = self.merged_edge(first).await?;
        let b = self.merged_edge(second).await?;
        let ids = (a.uid.clone(), b.uid.clone());

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE graph_edge WHERE uid = $uid_a OR uid = $uid_b; \
                 CREATE graph_edge CONTENT $row_a; \
                 CREATE graph_edge CONTENT $row_b; \
                 COMMIT TRANSACTION;",
            )
            .bind(("uid_a", ids.0.clone()))
            .bind(("uid_b", ids.1.clone()))
            .bind(("row_a", a))
            .bind(("row_b", b))
            .await?
            .check()?;
        Ok(ids)
    }

    async fn find_relationships(
        &self,
        filter: &RelationshipFilter,
    ) -> Result<Vec<GraphRelationship>, GraphError> {
        let mut query =
            String::from("SELECT uid, rel_type, from_uid, to_uid, scope, props FROM graph_edge");
        let mut clauses = Vec::new();
        if filter.from.is_some() {
            clauses.push("from_uid = $from");
        }
        if filter.to.is_some() {
            clauses.push("to_uid = $to");
        }
        if filter.rel_type.is_some() {
            clauses.push("rel_type = $rel_type");
        }
        if filter.scope.is_some() {
            clauses.push("scope = $scope");
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY uid");

        let rows: Vec<EdgeRow> = self
            .db
            .query(&query)
            .bind(("from", filter.from.clone().unwrap_or_default()))
            .bind(("to", filter.to.clone().unwrap_or_default()))
            .bind(("rel_type", filter.rel_type.clone().unwrap_or_default()))
            .bind(("scope", filter.scope.clone().unwrap_or_default()))
            .await?
            .take(0)?;

        rows.into_iter().map(EdgeRow::into_relationship).collect()
    }

    async fn delete_scope(&self, scope: &str) -> Result<(), GraphError> {
        let _guard = self.write_lock.lock().await;
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 LET $gone = (SELECT VALUE uid FROM graph_node WHERE scope = $scope); \
                 DELETE graph_edge WHERE scope = $scope OR from_uid INSIDE $gone OR to_uid INSIDE $gone; \
                 DELETE graph_node WHERE scope = $scope; \
                 COMMIT TRANSACTION;",
            )
            .bind(("scope", scope.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, GraphError> {
        Ok(GraphStats {
            nodes: self.count("graph_node").await?,
            relationships: self.count("graph_edge").await?,
        })
    }

    async fn run_query(&self, query: &str, params: Properties) -> Result<Vec<Value>, GraphError> {
        let mut request = self.db.query(query);
        for (key, value) in params {
            request = request.bind((key, value));
        }
        let rows: Vec<Value> = request.await?.take(0)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::schema;

    #[tokio::test]
    async fn test_node_round_trip() {
        let store = SurrealGraphStore::in_memory().await.unwrap();
        let id = store
            .create_node(
                NodeDraft::new("s", schema::FILE)
                    .with_id("file-1")
                    .property("path", "src/app.py")
                    .property("size", 12),
            )
            .await
            .unwrap();

        let node = store.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.prop_str("path"), Some("src/app.py"));
        assert_eq!(node.prop_u64("size"), Some(12));
        assert!(node.has_label(schema::FILE));
    }

    #[tokio::test]
    async fn test_find_and_delete_scope() {
        let store = SurrealGraphStore::in_memory().await.unwrap();
        store
            .create_node(NodeDraft::new("a", schema::FILE).with_id("f-a").property("name", "x"))
            .await
            .unwrap();
        store
            .create_node(NodeDraft::new("b", schema::FILE).with_id("f-b").property("name", "y"))
            .await
            .unwrap();
        store
            .create_relationship(RelationshipDraft::new("f-a", schema::REFERENCES, "f-b", "b"))
            .await
            .unwrap();

        let found = store
            .find_nodes(&NodeFilter::label(schema::FILE).where_eq("name", "y"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "f-b");

        store.delete_scope("b").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.relationships, 0);
    }
}
