//! Native parser: tree-sitter grammars plus `syn` for Rust.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tree_sitter::{Node, Parser as TSParser};

use super::languages::{spec_for, Grammar, LanguageSpec, LANGUAGES};
use super::{
    callee_name, rust, signature_of, CodeParser, FileSymbols, ParseContext, ParseReport,
    ParserError, Symbol, SymbolKind, SymbolWriter,
};
use crate::error::{ItemError, ItemErrorKind, Stage};

/// Registry name of the native parser.
pub const TREE_SITTER_PARSER: &str = "tree-sitter";

/// Reports whether a language's grammar can be loaded into a parser.
pub type GrammarCheck = fn(&LanguageSpec) -> Result<(), String>;

/// Loads the grammar the way a parse would.
pub fn load_grammar(spec: &LanguageSpec) -> Result<(), String> {
    match spec.grammar {
        Grammar::TreeSitter(load) => TSParser::new()
            .set_language(&load())
            .map_err(|e| e.to_string()),
        Grammar::Syn | Grammar::None => Ok(()),
    }
}

/// Table-driven native parser.
///
/// A grammar that fails to load disables only its own language: files in
/// that language are recorded as parse errors and everything else is parsed
/// as usual. The parser is unavailable only when no grammar loads.
pub struct TreeSitterParser {
    check: GrammarCheck,
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self { check: load_grammar }
    }
}

impl fmt::Debug for TreeSitterParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSitterParser").finish_non_exhaustive()
    }
}

impl TreeSitterParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser deciding grammar availability with `check`.
    pub fn with_grammar_check(check: GrammarCheck) -> Self {
        Self { check }
    }

    /// Tree-sitter languages whose grammar does not load, with the reason.
    pub fn unavailable_languages(&self) -> BTreeMap<&'static str, String> {
        tree_sitter_languages()
            .filter_map(|spec| (self.check)(spec).err().map(|reason| (spec.name, reason)))
            .collect()
    }
}

fn tree_sitter_languages() -> impl Iterator<Item = &'static LanguageSpec> {
    LANGUAGES
        .iter()
        .filter(|spec| matches!(spec.grammar, Grammar::TreeSitter(_)))
}

/// Extraction outcome for one file.
pub(crate) struct Extracted {
    pub symbols: FileSymbols,
    /// The grammar recovered from syntax errors.
    pub partial: bool,
}

/// Extract symbols from `source` according to `spec`.
pub(crate) fn extract_symbols(spec: &LanguageSpec, source: &str) -> Result<Extracted, String> {
    match spec.grammar {
        Grammar::TreeSitter(load) => {
            let mut parser = TSParser::new();
            parser
                .set_language(&load())
                .map_err(|e| format!("failed to load {} grammar: {}", spec.name, e))?;
            let tree = parser
                .parse(source, None)
                .ok_or_else(|| "parser produced no tree".to_string())?;
            let root = tree.root_node();

            let mut extractor = Extractor {
                spec,
                source,
                out: FileSymbols {
                    line_count: source.lines().count(),
                    ..Default::default()
                },
            };
            extractor.walk(root);
            Ok(Extracted {
                symbols: extractor.out,
                partial: root.has_error(),
            })
        }
        Grammar::Syn => rust::extract(source).map(|symbols| Extracted {
            symbols,
            partial: false,
        }),
        Grammar::None => Err(format!("no grammar for {}", spec.name)),
    }
}

struct Extractor<'s> {
    spec: &'s LanguageSpec,
    source: &'s str,
    out: FileSymbols,
}

impl<'s> Extractor<'s> {
    fn text(&self, node: Node) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or_default()
    }

    fn name_of(&self, node: Node) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .filter(|n| !n.is_empty())
    }

    fn push(&mut self, kind: SymbolKind, name: String, node: Node, enclosing: Option<usize>) -> usize {
        let qualified_name = match enclosing.and_then(|i| self.out.symbols.get(i)) {
            Some(parent) => format!("{}.{}", parent.qualified_name, name),
            None => name.clone(),
        };
        self.out.symbols.push(Symbol {
            kind,
            name,
            qualified_name,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            signature: signature_of(self.text(node)),
            parent: enclosing,
            calls: Vec::new(),
        });
        self.out.symbols.len() - 1
    }

    fn record_call(&mut self, callee: String, enclosing: Option<usize>) {
        match enclosing.and_then(|i| self.out.symbols.get_mut(i)) {
            Some(symbol) => {
                if !symbol.calls.contains(&callee) {
                    symbol.calls.push(callee);
                }
            }
            None => {
                if !self.out.module_calls.contains(&callee) {
                    self.out.module_calls.push(callee);
                }
            }
        }
    }

    fn is_class(&self, node: Node) -> bool {
        if !self.spec.class_kinds.contains(&node.kind()) {
            return false;
        }
        // Go type_spec covers aliases too; only structs and interfaces count.
        if node.kind() == "type_spec" {
            return node
                .child_by_field_name("type")
                .map_or(false, |t| matches!(t.kind(), "struct_type" | "interface_type"));
        }
        true
    }

    /// Depth-first walk with an explicit stack; children are visited in
    /// source order.
    fn walk<'t>(&mut self, root: Node<'t>) {
        let call_kinds = self.spec.call_kinds;
        // (node, enclosing symbol, directly inside a class body)
        let mut stack: Vec<(Node<'t>, Option<usize>, bool)> = vec![(root, None, false)];

        while let Some((node, enclosing, in_class)) = stack.pop() {
            let kind = node.kind();
            let mut child_enclosing = enclosing;
            let mut child_in_class = in_class;

            if self.is_class(node) {
                if let Some(name) = self.name_of(node) {
                    child_enclosing = Some(self.push(SymbolKind::Class, name, node, enclosing));
                }
                child_in_class = true;
            } else if self.spec.function_kinds.contains(&kind) {
                if let Some(name) = self.name_of(node) {
                    let sym = if in_class { SymbolKind::Method } else { SymbolKind::Function };
                    child_enclosing = Some(self.push(sym, name, node, enclosing));
                }
                child_in_class = false;
            } else if self.spec.method_kinds.contains(&kind) {
                if let Some(name) = self.name_of(node) {
                    child_enclosing = Some(self.push(SymbolKind::Method, name, node, enclosing));
                }
                child_in_class = false;
            } else if self.spec.binding_kinds.contains(&kind) {
                let is_function_value = node.child_by_field_name("value").map_or(false, |v| {
                    matches!(v.kind(), "arrow_function" | "function_expression" | "function")
                });
                if is_function_value {
                    if let Some(name) = self.name_of(node) {
                        let sym = if in_class { SymbolKind::Method } else { SymbolKind::Function };
                        child_enclosing = Some(self.push(sym, name, node, enclosing));
                    }
                    child_in_class = false;
                }
            }

            if let Some((_, field)) = call_kinds.iter().find(|(k, _)| *k == kind) {
                if let Some(callee) = node
                    .child_by_field_name(*field)
                    .and_then(|c| callee_name(self.text(c)))
                {
                    self.record_call(callee, enclosing);
                }
            }

            let mut cursor = node.walk();
            let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push((child, child_enclosing, child_in_class));
            }
        }
    }
}

#[async_trait]
impl CodeParser for TreeSitterParser {
    fn name(&self) -> &str {
        TREE_SITTER_PARSER
    }

    fn description(&self) -> &str {
        "Native tree-sitter parser (Python, JavaScript, TypeScript, Go, Java, C#) with syn for Rust"
    }

    async fn ensure_available(&self) -> Result<(), ParserError> {
        let unavailable = self.unavailable_languages();
        for (language, reason) in &unavailable {
            tracing::warn!(%language, %reason, "grammar failed to load, language disabled");
        }
        if !unavailable.is_empty() && unavailable.len() == tree_sitter_languages().count() {
            let reasons: Vec<String> = unavailable
                .iter()
                .map(|(language, reason)| format!("{}: {}", language, reason))
                .collect();
            return Err(ParserError::Unavailable {
                name: TREE_SITTER_PARSER.to_string(),
                reason: format!("no grammar loads ({})", reasons.join("; ")),
            });
        }
        Ok(())
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<ParseReport, ParserError> {
        let mut report = ParseReport::default();
        report.stats.parser = TREE_SITTER_PARSER.to_string();
        let mut writer = SymbolWriter::new(ctx, TREE_SITTER_PARSER);
        let unavailable = self.unavailable_languages();

        for file in ctx.files.iter() {
            if ctx.cancel.is_cancelled() {
                return Err(ParserError::Cancelled);
            }
            report.stats.files_seen += 1;

            let spec = match file.language.as_deref().and_then(spec_for) {
                Some(spec) if !matches!(spec.grammar, Grammar::None) && !file.oversized => spec,
                _ => {
                    report.stats.files_skipped += 1;
                    continue;
                }
            };

            if let Some(reason) = unavailable.get(spec.name) {
                report.stats.files_failed += 1;
                report.errors.push(ItemError::new(
                    Stage::Parsing,
                    ItemErrorKind::Parse,
                    &file.rel_path,
                    format!("{} grammar unavailable: {}", spec.name, reason),
                ));
                continue;
            }

            let source = match ctx.fs.read_file(&file.abs_path).await {
                Ok(source) => source,
                Err(e) => {
                    report.stats.files_failed += 1;
                    report.errors.push(ItemError::new(
                        Stage::Parsing,
                        ItemErrorKind::Parse,
                        &file.rel_path,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let extracted = tokio::task::spawn_blocking(move || extract_symbols(spec, &source))
                .await
                .map_err(|e| ParserError::Tool(format!("parse task failed: {}", e)))?;

            match extracted {
                Ok(extracted) => {
                    if extracted.partial {
                        report.errors.push(ItemError::new(
                            Stage::Parsing,
                            ItemErrorKind::Parse,
                            &file.rel_path,
                            "syntax errors; extracted what could be recovered",
                        ));
                    }
                    writer
                        .write_file(file, spec.name, extracted.symbols, &mut report.stats)
                        .await?;
                    report.stats.files_parsed += 1;
                    *report
                        .stats
                        .by_language
                        .entry(spec.name.to_string())
                        .or_insert(0) += 1;
                }
                Err(message) => {
                    tracing::debug!(file = %file.rel_path, %message, "parse failed");
                    report.stats.files_failed += 1;
                    report.errors.push(ItemError::new(
                        Stage::Parsing,
                        ItemErrorKind::Parse,
                        &file.rel_path,
                        message,
                    ));
                }
            }
        }

        writer.resolve_calls(&mut report.stats).await?;
        tracing::info!(
            files = report.stats.files_parsed,
            nodes = report.stats.nodes_created,
            calls = report.stats.calls_resolved,
            "tree-sitter parse finished"
        );
        Ok(report)
    }
}
