//! Documentation processor.
//!
//! Turns supplied documentation (a file, a directory of documents, or an
//! HTTP(S) URI) into DocumentationNode nodes and links each one with
//! `REFERENCES` to the File and AST nodes it mentions.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{DocsConfig, MIN_DOC_IDENTIFIER_LEN};
use crate::error::{IngestError, ItemError, ItemErrorKind, Stage};
use crate::fs::FileSystem;
use crate::graph::{node_id, schema, GraphNode, GraphStore, NodeDraft, NodeFilter, RelationshipDraft};

/// Counters for one documentation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocsStats {
    pub documents: usize,
    pub failed: usize,
    pub file_references: usize,
    pub ast_references: usize,
}

/// Result of a documentation run.
#[derive(Debug, Clone, Default)]
pub struct DocsReport {
    pub stats: DocsStats,
    pub errors: Vec<ItemError>,
}

/// A loaded document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path or URI it came from.
    pub source: String,
    pub title: String,
    pub format: String,
    pub content: String,
}

impl Document {
    pub fn new(source: impl Into<String>, content: String) -> Self {
        let source = source.into();
        let name = source
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&source)
            .to_string();
        let format = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string());
        let title = first_heading(&content).unwrap_or(name);
        Self {
            source,
            title,
            format,
            content,
        }
    }
}

/// First Markdown heading, or the first line of an underlined reST title.
fn first_heading(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().take(50).collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let title = rest.trim_start_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
        if let Some(next) = lines.get(i + 1) {
            let next = next.trim();
            let underlined = next.len() >= 3
                && next.chars().all(|c| c == '=' || c == '-')
                && !trimmed.is_empty();
            if underlined {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Loads documents and links them into the graph.
pub struct DocumentationProcessor {
    store: Arc<dyn GraphStore>,
    fs: Arc<dyn FileSystem>,
    config: DocsConfig,
    client: reqwest::Client,
    words: Regex,
}

impl DocumentationProcessor {
    pub fn new(
        store: Arc<dyn GraphStore>,
        fs: Arc<dyn FileSystem>,
        config: DocsConfig,
    ) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| IngestError::InvalidInput(format!("http client: {}", e)))?;
        let words = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*")
            .map_err(|e| IngestError::InvalidInput(e.to_string()))?;
        Ok(Self {
            store,
            fs,
            config,
            client,
            words,
        })
    }

    /// Load, store and link the documentation of one ingestion.
    pub async fn process(
        &self,
        scope: &str,
        doc_path: Option<&Path>,
        doc_uri: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DocsReport, IngestError> {
        let mut report = DocsReport::default();
        let mut documents = Vec::new();

        if let Some(path) = doc_path {
            match self.load_path(path).await {
                Ok(mut docs) => documents.append(&mut docs),
                Err(e) => report.fail(path.display().to_string(), e),
            }
        }
        if let Some(uri) = doc_uri {
            match self.fetch(uri).await {
                Ok(doc) => documents.push(doc),
                Err(e) => report.fail(uri.to_string(), e),
            }
        }
        if documents.is_empty() {
            return Ok(report);
        }

        let files = self
            .store
            .find_nodes(&NodeFilter::label(schema::FILE).in_scope(scope))
            .await?;
        let symbols = self
            .store
            .find_nodes(&NodeFilter::label(schema::AST_NODE).in_scope(scope))
            .await?;

        for doc in documents {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let source = doc.source.clone();
            if let Err(e) = self.store_document(scope, doc, &files, &symbols, &mut report).await {
                report.errors.push(ItemError::new(
                    Stage::Documentation,
                    ItemErrorKind::GraphStore,
                    source,
                    e.to_string(),
                ));
                report.stats.failed += 1;
            }
        }

        tracing::info!(
            documents = report.stats.documents,
            file_references = report.stats.file_references,
            ast_references = report.stats.ast_references,
            "documentation processed"
        );
        Ok(report)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    async fn load_path(&self, path: &Path) -> Result<Vec<Document>, String> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| e.to_string())?;

        let paths = if meta.is_dir() {
            self.fs
                .list_files(path)
                .await
                .map_err(|e| e.to_string())?
                .into_iter()
                .filter(|p| self.accepts(p))
                .collect()
        } else {
            vec![path.to_path_buf()]
        };

        let mut docs = Vec::with_capacity(paths.len());
        for file in paths {
            let content = self.fs.read_file(&file).await.map_err(|e| e.to_string())?;
            docs.push(Document::new(file.to_string_lossy().into_owned(), content));
        }
        Ok(docs)
    }

    async fn fetch(&self, uri: &str) -> Result<Document, String> {
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err("only http(s) URIs are supported".to_string());
        }
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let content = response.text().await.map_err(|e| e.to_string())?;
        Ok(Document::new(uri, content))
    }

    async fn store_document(
        &self,
        scope: &str,
        doc: Document,
        files: &[GraphNode],
        symbols: &[GraphNode],
        report: &mut DocsReport,
    ) -> Result<(), crate::graph::GraphError> {
        let id = node_id(scope, schema::DOCUMENTATION, &doc.source);
        self.store
            .create_node(
                NodeDraft::new(scope, schema::DOCUMENTATION)
                    .with_id(&id)
                    .property("title", doc.title.clone())
                    .property("source", doc.source.clone())
                    .property("format", doc.format.clone())
                    .property("size", doc.content.len())
                    .property("content", doc.content.clone()),
            )
            .await?;
        report.stats.documents += 1;

        for (file_id, how) in referenced_files(&doc.content, files) {
            self.store
                .create_relationship(
                    RelationshipDraft::new(&id, schema::REFERENCES, file_id, scope)
                        .property("match", how),
                )
                .await?;
            report.stats.file_references += 1;
        }

        let words: HashSet<&str> = self
            .words
            .find_iter(&doc.content)
            .map(|m| m.as_str())
            .filter(|w| w.len() >= MIN_DOC_IDENTIFIER_LEN)
            .collect();
        for symbol in symbols {
            if symbol.has_label("Module") {
                continue;
            }
            let Some(name) = symbol.prop_str("name") else {
                continue;
            };
            if words.contains(name) {
                self.store
                    .create_relationship(
                        RelationshipDraft::new(&id, schema::REFERENCES, &symbol.id, scope)
                            .property("match", "identifier"),
                    )
                    .await?;
                report.stats.ast_references += 1;
            }
        }
        Ok(())
    }
}

impl DocsReport {
    fn fail(&mut self, item: String, message: String) {
        self.stats.failed += 1;
        self.errors.push(ItemError::new(
            Stage::Documentation,
            ItemErrorKind::Documentation,
            item,
            message,
        ));
    }
}

/// Files whose relative path, or distinctive basename, appears in `text`.
fn referenced_files<'a>(text: &str, files: &'a [GraphNode]) -> Vec<(&'a str, &'static str)> {
    let mut found = Vec::new();
    for file in files {
        let Some(path) = file.prop_str("path") else {
            continue;
        };
        if path.contains('/') && text.contains(path) {
            found.push((file.id.as_str(), "path"));
            continue;
        }
        let name = file.prop_str("name").unwrap_or(path);
        if name.contains('.') && name.len() >= MIN_DOC_IDENTIFIER_LEN && text.contains(name) {
            found.push((file.id.as_str(), "basename"));
        }
    }
    found
}
