//! Named parser registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::external::ExternalToolParser;
use super::treesitter::TreeSitterParser;
use super::{CodeParser, ParserError};
use crate::config::Config;

/// Registry of parsers keyed by name.
///
/// Built explicitly and handed to the ingestion service; there is no global
/// registry, so tests and concurrent runs never see each other's parsers.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, Arc<dyn CodeParser>>,
}

impl ParserRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in parsers.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TreeSitterParser::new()));
        registry.register(Arc::new(ExternalToolParser::new(config.parser.external.clone())));
        registry
    }

    /// Register a parser under its own name, replacing any previous one.
    pub fn register(&mut self, parser: Arc<dyn CodeParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CodeParser>, ParserError> {
        self.parsers
            .get(name)
            .cloned()
            .ok_or_else(|| ParserError::NotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(|s| s.as_str()).collect()
    }

    /// `(name, description)` pairs for listing.
    pub fn list_parsers(&self) -> Vec<(&str, &str)> {
        self.parsers
            .iter()
            .map(|(name, parser)| (name.as_str(), parser.description()))
            .collect()
    }
}
