//! Syntax parser abstraction.
//!
//! A [`CodeParser`] walks the files discovered by the filesystem builder and
//! writes AST nodes and their relationships straight into the graph store;
//! nothing is accumulated in memory beyond one file at a time.
//!
//! # Built-in parsers
//!
//! | Name | Implementation |
//! |------|----------------|
//! | `tree-sitter` | tree-sitter grammars for Python, JavaScript, TypeScript, Go, Java, C#; `syn` for Rust |
//! | `external` | configured tool run natively or inside a container, emitting JSON lines |
//!
//! Per-file failures are soft: they are returned in [`ParseReport::errors`]
//! and the run continues. Initialization failures are hard
//! ([`ParserError::Unavailable`]).

mod external;
mod languages;
mod registry;
mod rust;
mod treesitter;

pub use external::{ExecutionMode, ExternalToolParser};
pub use languages::{language_for_path, LanguageSpec, LANGUAGES};
pub use registry::ParserRegistry;
pub use treesitter::{load_grammar, GrammarCheck, TreeSitterParser};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::ItemError;
use crate::fs::FileSystem;
use crate::graph::{node_id, schema, GraphError, GraphStore, NodeDraft, RelationshipDraft};

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParserError {
    /// The parser cannot run in this environment.
    #[error("Parser '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// No parser under this name.
    #[error("No parser registered as '{0}'")]
    NotRegistered(String),

    /// A file could not be parsed.
    #[error("Parse error in {path}: {message}")]
    File { path: String, message: String },

    /// The external tool failed as a whole.
    #[error("Parser tool failed: {0}")]
    Tool(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing cancelled")]
    Cancelled,
}

/// A file discovered by the filesystem builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// File node id.
    pub id: String,
    /// Root-relative, `/`-separated path.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub language: Option<String>,
    pub size: u64,
    pub oversized: bool,
}

/// Everything a parser needs for one run.
#[derive(Clone)]
pub struct ParseContext {
    pub root: PathBuf,
    /// Ingestion id; every written node carries it.
    pub scope: String,
    pub files: Arc<Vec<SourceFile>>,
    pub store: Arc<dyn GraphStore>,
    pub fs: Arc<dyn FileSystem>,
    pub cancel: CancellationToken,
}

/// Counters for one parse run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseStats {
    pub parser: String,
    pub files_seen: usize,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub calls_resolved: usize,
    pub by_language: BTreeMap<String, usize>,
}

/// Result of a parse run: counters plus soft per-file failures.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub stats: ParseStats,
    pub errors: Vec<ItemError>,
}

/// Contract every parser implements.
#[async_trait]
pub trait CodeParser: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// Fail fast when the parser cannot run here.
    async fn ensure_available(&self) -> Result<(), ParserError>;

    /// Parse the context's files into the graph.
    async fn parse(&self, ctx: &ParseContext) -> Result<ParseReport, ParserError>;
}

// ============================================================================
// Extracted symbols and graph writing shared by the native parsers
// ============================================================================

/// Kind of a syntactic construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Module,
    Class,
    Function,
    Method,
    Variable,
    Parameter,
}

impl SymbolKind {
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Module => "Module",
            SymbolKind::Class => "Class",
            SymbolKind::Function => "Function",
            SymbolKind::Method => "Method",
            SymbolKind::Variable => "Variable",
            SymbolKind::Parameter => "Parameter",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Module" => Some(SymbolKind::Module),
            "Class" => Some(SymbolKind::Class),
            "Function" => Some(SymbolKind::Function),
            "Method" => Some(SymbolKind::Method),
            "Variable" => Some(SymbolKind::Variable),
            "Parameter" => Some(SymbolKind::Parameter),
            _ => None,
        }
    }

    fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

/// One construct extracted from a file.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    pub qualified_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub signature: Option<String>,
    /// Index of the enclosing symbol; `None` for top-level.
    pub parent: Option<usize>,
    /// Names of called functions.
    pub calls: Vec<String>,
}

/// Symbols of one file.
#[derive(Debug, Clone, Default)]
pub struct FileSymbols {
    pub line_count: usize,
    pub symbols: Vec<Symbol>,
    /// Calls made at module level.
    pub module_calls: Vec<String>,
}

/// A call waiting for name resolution.
struct PendingCall {
    caller: String,
    callee: String,
    rel_path: String,
}

#[derive(Clone)]
struct CallTarget {
    id: String,
    rel_path: String,
}

/// Writes extracted symbols and resolves calls once all files are in.
pub(crate) struct SymbolWriter<'a> {
    ctx: &'a ParseContext,
    parser: &'a str,
    calls: Vec<PendingCall>,
    targets: HashMap<String, Vec<CallTarget>>,
}

impl<'a> SymbolWriter<'a> {
    pub(crate) fn new(ctx: &'a ParseContext, parser: &'a str) -> Self {
        Self {
            ctx,
            parser,
            calls: Vec::new(),
            targets: HashMap::new(),
        }
    }

    /// Write a file's module node, symbols and DECLARES edges.
    pub(crate) async fn write_file(
        &mut self,
        file: &SourceFile,
        language: &str,
        extracted: FileSymbols,
        stats: &mut ParseStats,
    ) -> Result<(), GraphError> {
        let scope = self.ctx.scope.as_str();
        let file_path = file.abs_path.to_string_lossy().into_owned();
        let module_name = module_name(&file.rel_path);

        let module_id = node_id(scope, schema::AST_NODE, &format!("{}#module", file.rel_path));
        self.ctx
            .store
            .create_node(
                NodeDraft::new(scope, schema::AST_NODE)
                    .with_id(&module_id)
                    .with_label(SymbolKind::Module.label())
                    .property("kind", SymbolKind::Module.label())
                    .property("name", module_name.clone())
                    .property("qualified_name", module_name)
                    .property("file_path", file_path.clone())
                    .property("language", language)
                    .property("start_line", 1)
                    .property("end_line", extracted.line_count.max(1))
                    .property("parser", self.parser)
                    .property(schema::MAPPING_STATUS, schema::STATUS_PENDING),
            )
            .await?;
        stats.nodes_created += 1;

        for callee in extracted.module_calls {
            self.calls.push(PendingCall {
                caller: module_id.clone(),
                callee,
                rel_path: file.rel_path.clone(),
            });
        }

        let mut ids: Vec<String> = Vec::with_capacity(extracted.symbols.len());
        for symbol in &extracted.symbols {
            let key = format!(
                "{}#{}:{}:{}",
                file.rel_path,
                symbol.kind.label(),
                symbol.qualified_name,
                symbol.start_line
            );
            let id = node_id(scope, schema::AST_NODE, &key);

            self.ctx
                .store
                .create_node(
                    NodeDraft::new(scope, schema::AST_NODE)
                        .with_id(&id)
                        .with_label(symbol.kind.label())
                        .property("kind", symbol.kind.label())
                        .property("name", symbol.name.clone())
                        .property("qualified_name", symbol.qualified_name.clone())
                        .property("file_path", file_path.clone())
                        .property("language", language)
                        .property("start_line", symbol.start_line)
                        .property("end_line", symbol.end_line)
                        .optional_property("signature", symbol.signature.clone())
                        .property("parser", self.parser)
                        .property(schema::MAPPING_STATUS, schema::STATUS_PENDING),
                )
                .await?;
            stats.nodes_created += 1;

            let parent_id = symbol
                .parent
                .and_then(|p| ids.get(p).cloned())
                .unwrap_or_else(|| module_id.clone());
            self.ctx
                .store
                .create_relationship(RelationshipDraft::new(
                    &parent_id,
                    schema::DECLARES,
                    &id,
                    scope,
                ))
                .await?;
            stats.relationships_created += 1;

            if symbol.kind.is_callable() {
                self.targets
                    .entry(symbol.name.clone())
                    .or_default()
                    .push(CallTarget {
                        id: id.clone(),
                        rel_path: file.rel_path.clone(),
                    });
            }
            for callee in &symbol.calls {
                self.calls.push(PendingCall {
                    caller: id.clone(),
                    callee: callee.clone(),
                    rel_path: file.rel_path.clone(),
                });
            }
            ids.push(id);
        }
        Ok(())
    }

    /// Resolve pending calls by name: a same-file target wins, otherwise the
    /// name must be unique across the repository.
    pub(crate) async fn resolve_calls(self, stats: &mut ParseStats) -> Result<(), GraphError> {
        for call in &self.calls {
            let Some(candidates) = self.targets.get(&call.callee) else {
                continue;
            };
            let same_file: Vec<&CallTarget> = candidates
                .iter()
                .filter(|t| t.rel_path == call.rel_path)
                .collect();

            let target = match (same_file.as_slice(), candidates.as_slice()) {
                ([only], _) => *only,
                ([], [only]) => only,
                _ => continue,
            };

            self.ctx
                .store
                .create_relationship(
                    RelationshipDraft::new(&call.caller, schema::CALLS, &target.id, &self.ctx.scope)
                        .property("callee", call.callee.clone()),
                )
                .await?;
            stats.calls_resolved += 1;
            stats.relationships_created += 1;
        }
        Ok(())
    }
}

/// Dotted module name from a relative path: `src/app/main.py` → `src.app.main`.
pub fn module_name(rel_path: &str) -> String {
    let without_ext = match rel_path.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => stem,
        _ => rel_path,
    };
    without_ext.replace('/', ".")
}

/// First line of a declaration, without a trailing body opener.
pub(crate) fn signature_of(text: &str) -> Option<String> {
    let first = text.lines().next()?.trim();
    let trimmed = first.trim_end_matches('{').trim_end_matches(':').trim_end();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(240).collect())
}

/// Last identifier of a callee expression: `self.db.execute` → `execute`.
pub(crate) fn callee_name(text: &str) -> Option<String> {
    let text = text.trim();
    let tail = text
        .rsplit(|c: char| c == '.' || c == ':' || c == '>')
        .next()
        .unwrap_or(text);
    let name: String = tail
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}
