//! Rust extraction with `syn`.

use quote::ToTokens;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{ImplItem, Item, TraitItem, Type};

use super::{FileSymbols, Symbol, SymbolKind};

/// Parse a Rust source file into symbols.
pub(crate) fn extract(source: &str) -> Result<FileSymbols, String> {
    let syntax = syn::parse_file(source).map_err(|e| format!("Parse error: {}", e))?;

    let mut visitor = SymbolVisitor {
        out: FileSymbols {
            line_count: source.lines().count(),
            ..Default::default()
        },
        enclosing: Vec::new(),
    };
    for item in &syntax.items {
        visitor.item(item);
    }
    Ok(visitor.out)
}

struct SymbolVisitor {
    out: FileSymbols,
    enclosing: Vec<usize>,
}

impl SymbolVisitor {
    fn current(&self) -> Option<usize> {
        self.enclosing.last().copied()
    }

    fn push(
        &mut self,
        kind: SymbolKind,
        name: String,
        span: proc_macro2::Span,
        signature: Option<String>,
    ) -> usize {
        let parent = self.current();
        let qualified_name = match parent.and_then(|i| self.out.symbols.get(i)) {
            Some(p) => format!("{}.{}", p.qualified_name, name),
            None => name.clone(),
        };
        self.out.symbols.push(Symbol {
            kind,
            name,
            qualified_name,
            start_line: span.start().line,
            end_line: span.end().line,
            signature,
            parent,
            calls: Vec::new(),
        });
        self.out.symbols.len() - 1
    }

    fn with_calls(&mut self, index: usize, block: &syn::Block) {
        let mut collector = CallCollector::default();
        collector.visit_block(block);
        if let Some(symbol) = self.out.symbols.get_mut(index) {
            symbol.calls = collector.calls;
        }
    }

    fn class_index(&self, name: &str) -> Option<usize> {
        self.out
            .symbols
            .iter()
            .position(|s| s.kind == SymbolKind::Class && s.name == name)
    }

    fn item(&mut self, item: &Item) {
        match item {
            Item::Fn(f) => {
                let sig = Some(f.sig.to_token_stream().to_string());
                let idx = self.push(SymbolKind::Function, f.sig.ident.to_string(), f.span(), sig);
                self.with_calls(idx, &f.block);
            }
            Item::Struct(s) => {
                self.push(SymbolKind::Class, s.ident.to_string(), s.span(), None);
            }
            Item::Enum(e) => {
                self.push(SymbolKind::Class, e.ident.to_string(), e.span(), None);
            }
            Item::Trait(t) => {
                let idx = self.push(SymbolKind::Class, t.ident.to_string(), t.span(), None);
                self.enclosing.push(idx);
                for trait_item in &t.items {
                    if let TraitItem::Fn(m) = trait_item {
                        let sig = Some(m.sig.to_token_stream().to_string());
                        let midx =
                            self.push(SymbolKind::Method, m.sig.ident.to_string(), m.span(), sig);
                        if let Some(body) = &m.default {
                            self.with_calls(midx, body);
                        }
                    }
                }
                self.enclosing.pop();
            }
            Item::Impl(i) => {
                let target = match &*i.self_ty {
                    Type::Path(p) => p.path.segments.last().map(|s| s.ident.to_string()),
                    _ => None,
                };
                let parent = target.as_deref().and_then(|t| self.class_index(t));
                if let Some(p) = parent {
                    self.enclosing.push(p);
                }
                for impl_item in &i.items {
                    if let ImplItem::Fn(m) = impl_item {
                        let sig = Some(m.sig.to_token_stream().to_string());
                        let midx =
                            self.push(SymbolKind::Method, m.sig.ident.to_string(), m.span(), sig);
                        self.with_calls(midx, &m.block);
                    }
                }
                if parent.is_some() {
                    self.enclosing.pop();
                }
            }
            Item::Const(c) => {
                self.push(SymbolKind::Variable, c.ident.to_string(), c.span(), None);
            }
            Item::Static(s) => {
                self.push(SymbolKind::Variable, s.ident.to_string(), s.span(), None);
            }
            Item::Mod(m) => {
                if let Some((_, items)) = &m.content {
                    let idx = self.push(SymbolKind::Module, m.ident.to_string(), m.span(), None);
                    self.enclosing.push(idx);
                    for inner in items {
                        self.item(inner);
                    }
                    self.enclosing.pop();
                }
            }
            _ => {}
        }
    }
}

/// Collects called function and method names from a body.
#[derive(Default)]
struct CallCollector {
    calls: Vec<String>,
}

impl CallCollector {
    fn add(&mut self, name: String) {
        if !self.calls.contains(&name) {
            self.calls.push(name);
        }
    }
}

impl<'ast> Visit<'ast> for CallCollector {
    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        if let syn::Expr::Path(path) = &*node.func {
            if let Some(segment) = path.path.segments.last() {
                self.add(segment.ident.to_string());
            }
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        self.add(node.method.to_string());
        visit::visit_expr_method_call(self, node);
    }

    // Nested fn items are separate symbols in spirit; do not attribute their calls.
    fn visit_item_fn(&mut self, _node: &'ast syn::ItemFn) {}
}
