//! AST-to-File mapper.
//!
//! Links every AST node of an ingestion to the File node that defines it.
//! The source path is read once from whichever of `file_path`, `path` or
//! `full_path` is set and stored back as `source_path`; matching then runs
//! through the strategies of [`MatchStrategy`] in order.
//!
//! A link is always the pair `PART_OF` (AST → File) and `DEFINES`
//! (File → AST), written with [`GraphStore::create_relationship_pair`] so a
//! reader never sees one without the other.

mod strategy;

pub use strategy::{normalize, FileEntry, MatchStrategy, PathMatch, PathMatcher};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, ItemError, ItemErrorKind, Stage};
use crate::graph::{schema, GraphNode, GraphStore, NodeFilter, Properties, RelationshipDraft};

/// Counters for one mapping run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingStats {
    pub total: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub ambiguous: usize,
    /// Already mapped by an earlier run.
    pub skipped: usize,
    /// Nodes carrying no path property at all.
    pub without_path: usize,
    pub failed: usize,
    pub by_strategy: BTreeMap<String, usize>,
}

/// Result of a mapping run.
#[derive(Debug, Clone, Default)]
pub struct MappingReport {
    pub stats: MappingStats,
    pub errors: Vec<ItemError>,
}

/// First non-empty path synonym of an AST node.
pub fn source_path(node: &GraphNode) -> Option<&str> {
    schema::PATH_KEYS
        .iter()
        .filter_map(|key| node.prop_str(key))
        .map(str::trim)
        .find(|p| !p.is_empty())
}

/// Maps AST nodes onto File nodes within one scope.
pub struct AstFileMapper {
    store: Arc<dyn GraphStore>,
    case_sensitive: bool,
}

impl AstFileMapper {
    pub fn new(store: Arc<dyn GraphStore>, case_sensitive: bool) -> Self {
        Self {
            store,
            case_sensitive,
        }
    }

    /// Build a matcher over the File nodes of a scope.
    pub async fn matcher(&self, scope: &str) -> Result<PathMatcher, IngestError> {
        let files = self
            .store
            .find_nodes(&NodeFilter::label(schema::FILE).in_scope(scope))
            .await?;
        let entries = files
            .into_iter()
            .filter_map(|node| {
                let path = node.prop_str("path")?.to_string();
                Some(FileEntry {
                    full_path: node.prop_str("full_path").map(str::to_string),
                    id: node.id,
                    path,
                })
            })
            .collect();
        Ok(PathMatcher::new(entries, self.case_sensitive))
    }

    /// Map every AST node of `scope`. `on_progress` receives `(done, total)`.
    pub async fn map_scope<F>(
        &self,
        scope: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<MappingReport, IngestError>
    where
        F: FnMut(usize, usize),
    {
        let matcher = self.matcher(scope).await?;
        let nodes = self
            .store
            .find_nodes(&NodeFilter::label(schema::AST_NODE).in_scope(scope))
            .await?;

        let mut report = MappingReport::default();
        report.stats.total = nodes.len();
        tracing::info!(scope, files = matcher.len(), ast_nodes = nodes.len(), "mapping AST nodes");

        for (done, node) in nodes.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            if let Err(error) = self.map_node(&matcher, node, scope, &mut report).await {
                report.stats.failed += 1;
                report.errors.push(ItemError::new(
                    Stage::Mapping,
                    ItemErrorKind::GraphStore,
                    &node.id,
                    error.to_string(),
                ));
            }
            on_progress(done + 1, nodes.len());
        }

        tracing::info!(
            mapped = report.stats.mapped,
            unmapped = report.stats.unmapped,
            ambiguous = report.stats.ambiguous,
            skipped = report.stats.skipped,
            "mapping finished"
        );
        Ok(report)
    }

    async fn map_node(
        &self,
        matcher: &PathMatcher,
        node: &GraphNode,
        scope: &str,
        report: &mut MappingReport,
    ) -> Result<(), crate::graph::GraphError> {
        if node.prop_str(schema::MAPPING_STATUS) == Some(schema::STATUS_MAPPED) {
            report.stats.skipped += 1;
            return Ok(());
        }

        let Some(path) = source_path(node).map(str::to_string) else {
            report.stats.without_path += 1;
            report.stats.unmapped += 1;
            return self.mark(&node.id, schema::STATUS_UNMAPPED, None).await;
        };

        match matcher.find(&path) {
            PathMatch::Unique { file_id, strategy } => {
                self.store
                    .create_relationship_pair(
                        RelationshipDraft::new(&node.id, schema::PART_OF, &file_id, scope)
                            .property("strategy", strategy.as_str()),
                        RelationshipDraft::new(&file_id, schema::DEFINES, &node.id, scope)
                            .property("strategy", strategy.as_str()),
                    )
                    .await?;

                let mut props = Properties::new();
                props.insert("source_path".to_string(), Value::String(path));
                props.insert(schema::MAPPING_STATUS.to_string(), json!(schema::STATUS_MAPPED));
                props.insert(schema::MAPPED_FILE_ID.to_string(), Value::String(file_id));
                props.insert(schema::MAPPING_STRATEGY.to_string(), json!(strategy.as_str()));
                self.store.update_properties(&node.id, props).await?;

                report.stats.mapped += 1;
                *report
                    .stats
                    .by_strategy
                    .entry(strategy.as_str().to_string())
                    .or_default() += 1;
                Ok(())
            }
            PathMatch::Ambiguous { candidates } => {
                report.stats.ambiguous += 1;
                report.errors.push(ItemError::new(
                    Stage::Mapping,
                    ItemErrorKind::MappingAmbiguity,
                    &node.id,
                    format!("'{}' matches {} files", path, candidates.len()),
                ));
                self.mark(&node.id, schema::STATUS_AMBIGUOUS, Some((path, candidates.len())))
                    .await
            }
            PathMatch::NoMatch => {
                report.stats.unmapped += 1;
                tracing::debug!(node = %node.id, path = %path, "no file matches");
                self.mark(&node.id, schema::STATUS_UNMAPPED, Some((path, 0)))
                    .await
            }
        }
    }

    async fn mark(
        &self,
        id: &str,
        status: &str,
        detail: Option<(String, usize)>,
    ) -> Result<(), crate::graph::GraphError> {
        let mut props = Properties::new();
        props.insert(schema::MAPPING_STATUS.to_string(), json!(status));
        if let Some((path, candidates)) = detail {
            props.insert("source_path".to_string(), Value::String(path));
            props.insert(schema::MAPPING_CANDIDATES.to_string(), json!(candidates));
        }
        self.store.update_properties(id, props).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraphStore, NodeDraft, RelationshipFilter};

    async fn file(store: &MemoryGraphStore, scope: &str, path: &str) -> String {
        store
            .create_node(
                NodeDraft::new(scope, schema::FILE)
                    .property("path", path)
                    .property("full_path", format!("/repo/{}", path)),
            )
            .await
            .unwrap()
    }

    async fn ast(store: &MemoryGraphStore, scope: &str, key: &str, path: &str) -> String {
        store
            .create_node(
                NodeDraft::new(scope, schema::AST_NODE)
                    .with_label("Function")
                    .property("name", "f")
                    .property(key, path),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_source_path_prefers_first_synonym() {
        let mut node = GraphNode {
            id: "n".to_string(),
            labels: vec![],
            scope: "s".to_string(),
            properties: Properties::new(),
        };
        node.properties.insert("full_path".to_string(), json!("/a/b.py"));
        assert_eq!(source_path(&node), Some("/a/b.py"));
        node.properties.insert("file_path".to_string(), json!(""));
        node.properties.insert("path".to_string(), json!("b.py"));
        assert_eq!(source_path(&node), Some("b.py"));
    }

    #[tokio::test]
    async fn test_map_scope_links_pairs_and_flags_unmapped() {
        let store = Arc::new(MemoryGraphStore::new());
        let file_id = file(&store, "s", "src/app/main.py").await;
        let mapped = ast(&store, "s", "full_path", "./src/app/main.py").await;
        let orphan = ast(&store, "s", "path", "other/file.py").await;
        let bare = store
            .create_node(NodeDraft::new("s", schema::AST_NODE))
            .await
            .unwrap();

        let mapper = AstFileMapper::new(store.clone(), true);
        let report = mapper
            .map_scope("s", &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.stats.mapped, 1);
        assert_eq!(report.stats.unmapped, 2);
        assert_eq!(report.stats.without_path, 1);

        let part_of = store
            .find_relationships(&RelationshipFilter::of_type(schema::PART_OF).from_node(&mapped))
            .await
            .unwrap();
        let defines = store
            .find_relationships(&RelationshipFilter::of_type(schema::DEFINES).to_node(&mapped))
            .await
            .unwrap();
        assert_eq!(part_of.len(), 1);
        assert_eq!(defines.len(), 1);
        assert_eq!(part_of[0].to, file_id);
        assert_eq!(defines[0].from, file_id);

        for id in [&orphan, &bare] {
            let node = store.get_node(id).await.unwrap().unwrap();
            assert_eq!(node.prop_str(schema::MAPPING_STATUS), Some(schema::STATUS_UNMAPPED));
        }
    }

    #[tokio::test]
    async fn test_remap_skips_mapped_nodes() {
        let store = Arc::new(MemoryGraphStore::new());
        file(&store, "s", "a.py").await;
        ast(&store, "s", "file_path", "/repo/a.py").await;

        let mapper = AstFileMapper::new(store.clone(), true);
        let cancel = CancellationToken::new();
        mapper.map_scope("s", &cancel, |_, _| {}).await.unwrap();
        let second = mapper.map_scope("s", &cancel, |_, _| {}).await.unwrap();

        assert_eq!(second.stats.skipped, 1);
        assert_eq!(second.stats.mapped, 0);
        let pairs = store
            .find_relationships(&RelationshipFilter::of_type(schema::PART_OF))
            .await
            .unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_is_soft_error() {
        let store = Arc::new(MemoryGraphStore::new());
        file(&store, "s", "a/util.py").await;
        file(&store, "s", "b/util.py").await;
        let node = ast(&store, "s", "path", "util.py").await;

        let report = AstFileMapper::new(store.clone(), true)
            .map_scope("s", &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.stats.ambiguous, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ItemErrorKind::MappingAmbiguity);
        let node = store.get_node(&node).await.unwrap().unwrap();
        assert_eq!(node.prop_u64(schema::MAPPING_CANDIDATES), Some(2));
    }

    #[tokio::test]
    async fn test_other_scopes_untouched() {
        let store = Arc::new(MemoryGraphStore::new());
        file(&store, "s1", "a.py").await;
        let foreign = ast(&store, "s2", "path", "a.py").await;

        AstFileMapper::new(store.clone(), true)
            .map_scope("s1", &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();

        let node = store.get_node(&foreign).await.unwrap().unwrap();
        assert!(node.prop_str(schema::MAPPING_STATUS).is_none());
    }
}
