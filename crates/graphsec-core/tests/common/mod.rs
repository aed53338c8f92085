#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use graphsec_core::config::{Config, ConflictPolicy};
use graphsec_core::graph::{schema, GraphNode, GraphStore, NodeFilter};
use graphsec_core::llm::{LLMError, LLM};

/// In-memory config with fast retries.
pub fn config() -> Config {
    let mut config = Config::default();
    config.graph.backend = "memory".to_string();
    config.summarizer.backoff_base_ms = 1;
    config.summarizer.backoff_max_ms = 5;
    config.summarizer.request_timeout_secs = 5;
    config
}

/// Config with the workflow settings filled in and reports under `reports`.
pub fn workflow_config(reports: &Path) -> Config {
    let mut config = config();
    config.sources_sinks.confidence_threshold = Some(0.7);
    config.sources_sinks.conflict_policy = Some(ConflictPolicy::Any);
    config.sources_sinks.reports_dir = reports.to_path_buf();
    config
}

/// A temporary repository holding `files`.
pub fn write_repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

type Script = dyn Fn(&str, &str) -> Result<String, LLMError> + Send + Sync;

/// LLM answering from a closure over `(system, prompt)`.
pub struct ScriptedLlm {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers every prompt with the same text.
    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn as_llm(self: &Arc<Self>) -> Arc<dyn LLM> {
        self.clone()
    }
}

#[async_trait]
impl LLM for ScriptedLlm {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LLMError> {
        self.complete_with_system("", prompt, max_tokens).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(system, prompt)
    }
}

pub async fn nodes(store: &Arc<dyn GraphStore>, scope: &str, label: &str) -> Vec<GraphNode> {
    store
        .find_nodes(&NodeFilter::label(label).in_scope(scope))
        .await
        .unwrap()
}

/// The AST node named `name` in `scope`.
pub async fn ast_named(store: &Arc<dyn GraphStore>, scope: &str, name: &str) -> GraphNode {
    nodes(store, scope, schema::AST_NODE)
        .await
        .into_iter()
        .find(|n| n.prop_str("name") == Some(name))
        .unwrap_or_else(|| panic!("no AST node named {}", name))
}
