//! Funnels: candidate generation for the query stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Role, WorkflowError};
use crate::config::{SECURITY_SYMBOLS, SINK_KEYWORDS, SOURCE_KEYWORDS};
use crate::graph::{schema, GraphStore, NodeFilter};

/// Graph view handed to funnels.
#[derive(Clone)]
pub struct FunnelContext {
    pub store: Arc<dyn GraphStore>,
    /// Ingestion scopes to search; empty means the whole graph.
    pub scopes: Vec<String>,
}

impl FunnelContext {
    pub fn filter(&self, label: &str) -> NodeFilter {
        NodeFilter::label(label).in_scopes(&self.scopes)
    }
}

/// One node proposed by a funnel.
#[derive(Debug, Clone, PartialEq)]
pub struct FunnelHit {
    pub node_id: String,
    pub role: Option<Role>,
    /// Suggested kind such as `user_input` or `database_write`.
    pub kind: Option<String>,
    pub reason: String,
}

/// Proposes candidate Source/Sink nodes.
#[async_trait]
pub trait Funnel: Send + Sync {
    fn name(&self) -> &str;

    async fn find_candidates(&self, ctx: &FunnelContext) -> Result<Vec<FunnelHit>, WorkflowError>;
}

/// Kind suggested by a source keyword.
fn source_kind(keyword: &str) -> &'static str {
    match keyword {
        "environment variable" | "command line" | "argv" | "stdin" => "environment",
        "socket" => "network",
        "deserializ" => "deserialization",
        "reads file" => "file_read",
        _ => "user_input",
    }
}

/// Kind suggested by a sink keyword.
fn sink_kind(keyword: &str) -> &'static str {
    match keyword {
        "sql" | "database" => "database_write",
        "writes file" | "file system" => "file_write",
        "render" | "template" => "template_render",
        "redirect" => "redirect",
        "log" => "logging",
        "response" => "http_response",
        _ => "command_execution",
    }
}

/// Source and sink keyword matches in a text, as `(role, keyword, kind)`.
pub fn keyword_hits(text: &str) -> Vec<(Role, &'static str, &'static str)> {
    let lower = text.to_lowercase();
    let mut hits = Vec::new();
    for keyword in SOURCE_KEYWORDS {
        if lower.contains(keyword) {
            hits.push((Role::Source, *keyword, source_kind(keyword)));
        }
    }
    for keyword in SINK_KEYWORDS {
        if lower.contains(keyword) {
            hits.push((Role::Sink, *keyword, sink_kind(keyword)));
        }
    }
    hits
}

/// Candidates from CodeSummary text.
pub struct SummaryKeywordFunnel;

pub const SUMMARY_KEYWORDS_FUNNEL: &str = "summary-keywords";

#[async_trait]
impl Funnel for SummaryKeywordFunnel {
    fn name(&self) -> &str {
        SUMMARY_KEYWORDS_FUNNEL
    }

    async fn find_candidates(&self, ctx: &FunnelContext) -> Result<Vec<FunnelHit>, WorkflowError> {
        let summaries = ctx.store.find_nodes(&ctx.filter(schema::CODE_SUMMARY)).await?;
        let mut hits = Vec::new();

        for summary in &summaries {
            let (Some(target), Some(text)) = (summary.prop_str("target_id"), summary.prop_str("text"))
            else {
                continue;
            };
            // One hit per role, keeping the first keyword's kind.
            let mut by_role: BTreeMap<Role, (&str, &str)> = BTreeMap::new();
            for (role, keyword, kind) in keyword_hits(text) {
                by_role.entry(role).or_insert((keyword, kind));
            }
            for (role, (keyword, kind)) in by_role {
                hits.push(FunnelHit {
                    node_id: target.to_string(),
                    role: Some(role),
                    kind: Some(kind.to_string()),
                    reason: format!("summary mentions '{}'", keyword),
                });
            }
        }
        Ok(hits)
    }
}

/// Candidates from security-relevant symbol names.
pub struct SymbolNameFunnel;

pub const SYMBOL_NAMES_FUNNEL: &str = "symbol-names";

#[async_trait]
impl Funnel for SymbolNameFunnel {
    fn name(&self) -> &str {
        SYMBOL_NAMES_FUNNEL
    }

    async fn find_candidates(&self, ctx: &FunnelContext) -> Result<Vec<FunnelHit>, WorkflowError> {
        let nodes = ctx.store.find_nodes(&ctx.filter(schema::AST_NODE)).await?;
        let hits = nodes
            .iter()
            .filter(|n| n.has_label("Function") || n.has_label("Method"))
            .filter_map(|node| {
                let name = node.prop_str("name")?.to_lowercase();
                let symbol = SECURITY_SYMBOLS.iter().find(|s| name.contains(*s))?;
                Some(FunnelHit {
                    node_id: node.id.clone(),
                    role: None,
                    kind: None,
                    reason: format!("name contains '{}'", symbol),
                })
            })
            .collect();
        Ok(hits)
    }
}

/// Funnels keyed by name.
#[derive(Default, Clone)]
pub struct FunnelRegistry {
    funnels: BTreeMap<String, Arc<dyn Funnel>>,
}

impl FunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in funnels.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SummaryKeywordFunnel));
        registry.register(Arc::new(SymbolNameFunnel));
        registry
    }

    pub fn register(&mut self, funnel: Arc<dyn Funnel>) {
        self.funnels.insert(funnel.name().to_string(), funnel);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Funnel>, WorkflowError> {
        self.funnels
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownFunnel(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.funnels.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraphStore, NodeDraft};

    #[test]
    fn test_keyword_hits() {
        let hits = keyword_hits("Reads the HTTP request body and runs a SQL query");
        assert!(hits.contains(&(Role::Source, "request", "user_input")));
        assert!(hits.contains(&(Role::Sink, "sql", "database_write")));
        assert!(keyword_hits("adds two numbers").is_empty());
    }

    #[tokio::test]
    async fn test_summary_funnel() {
        let store = Arc::new(MemoryGraphStore::new());
        store
            .create_node(
                NodeDraft::new("s", schema::CODE_SUMMARY)
                    .property("target_id", "fn-1")
                    .property("text", "Handles the login request and stores it in the database."),
            )
            .await
            .unwrap();
        store
            .create_node(
                NodeDraft::new("other", schema::CODE_SUMMARY)
                    .property("target_id", "fn-2")
                    .property("text", "Executes a shell command."),
            )
            .await
            .unwrap();

        let ctx = FunnelContext {
            store,
            scopes: vec!["s".to_string()],
        };
        let hits = SummaryKeywordFunnel.find_candidates(&ctx).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.node_id == "fn-1"));
        assert!(hits.iter().any(|h| h.role == Some(Role::Sink)));
    }

    #[tokio::test]
    async fn test_symbol_funnel() {
        let store = Arc::new(MemoryGraphStore::new());
        let exec = store
            .create_node(
                NodeDraft::new("s", schema::AST_NODE)
                    .with_label("Function")
                    .property("name", "run_exec"),
            )
            .await
            .unwrap();
        store
            .create_node(
                NodeDraft::new("s", schema::AST_NODE)
                    .with_label("Class")
                    .property("name", "RequestHandler"),
            )
            .await
            .unwrap();

        let ctx = FunnelContext {
            store,
            scopes: Vec::new(),
        };
        let hits = SymbolNameFunnel.find_candidates(&ctx).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, exec);
    }

    #[test]
    fn test_registry() {
        let registry = FunnelRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["summary-keywords", "symbol-names"]);
        assert!(matches!(
            registry.get("nope"),
            Err(WorkflowError::UnknownFunnel(_))
        ));
    }
}
