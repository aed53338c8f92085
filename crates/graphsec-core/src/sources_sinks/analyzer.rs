//! Analyzers: candidate confirmation for the analyze stage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::funnel::keyword_hits;
use super::prompts::{build_classify_prompt, CLASSIFY_SYSTEM_PROMPT};
use super::{Candidate, Classification, Role, Verdict, WorkflowError};
use crate::config::{Config, SummarizerConfig};
use crate::graph::{schema, GraphStore, RelationshipFilter};
use crate::llm::{extract_json, LLM};

/// Graph view handed to analyzers.
#[derive(Clone)]
pub struct AnalysisContext {
    pub store: Arc<dyn GraphStore>,
    pub scopes: Vec<String>,
}

/// Rates one candidate.
///
/// Returning `Ok(None)` abstains: the analyzer found nothing to judge by and
/// its silence counts neither for nor against the candidate.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        candidate: &Candidate,
        ctx: &AnalysisContext,
    ) -> Result<Option<Verdict>, WorkflowError>;
}

pub const LLM_ANALYZER: &str = "llm";
pub const DOCUMENTATION_ANALYZER: &str = "documentation";

/// Retry budget for transient LLM failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlmRetry {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&SummarizerConfig> for LlmRetry {
    fn from(config: &SummarizerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl Default for LlmRetry {
    fn default() -> Self {
        Self::from(&SummarizerConfig::default())
    }
}

impl LlmRetry {
    /// `base * 2^retries`, capped at `backoff_max`.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u32 << retries.min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Asks the LLM for a JSON verdict.
///
/// Rate limits, timeouts and server errors are retried with backoff; any
/// other failure becomes an analysis error straight away.
pub struct LlmAnalyzer {
    llm: Arc<dyn LLM>,
    max_tokens: u32,
    retry: LlmRetry,
}

impl LlmAnalyzer {
    pub fn new(llm: Arc<dyn LLM>, max_tokens: u32) -> Self {
        Self {
            llm,
            max_tokens,
            retry: LlmRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: LlmRetry) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        LLM_ANALYZER
    }

    async fn analyze(
        &self,
        candidate: &Candidate,
        _ctx: &AnalysisContext,
    ) -> Result<Option<Verdict>, WorkflowError> {
        let prompt = build_classify_prompt(candidate);
        let mut retries = 0;
        let response = loop {
            match self
                .llm
                .complete_with_system(CLASSIFY_SYSTEM_PROMPT, &prompt, self.max_tokens)
                .await
            {
                Ok(response) => break response,
                Err(e) if e.is_transient() && retries < self.retry.max_retries => {
                    let delay = self.retry.backoff(retries);
                    tracing::debug!(
                        candidate = %candidate.name,
                        error = %e,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying classification"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        parse_verdict(LLM_ANALYZER, &response).map(Some)
    }
}

#[derive(Debug, Deserialize)]
struct VerdictResponse {
    classification: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

/// Parses a JSON verdict, tolerating markdown fences.
pub fn parse_verdict(analyzer: &str, response: &str) -> Result<Verdict, WorkflowError> {
    let parsed: VerdictResponse = serde_json::from_str(extract_json(response))
        .map_err(|e| WorkflowError::Analyzer(format!("unparseable verdict: {}", e)))?;
    let classification = Classification::parse(&parsed.classification).ok_or_else(|| {
        WorkflowError::Analyzer(format!("unknown classification '{}'", parsed.classification))
    })?;
    let kind = match classification {
        Classification::Neither => None,
        _ => parsed.kind.filter(|k| !k.trim().is_empty()),
    };
    Ok(Verdict {
        analyzer: analyzer.to_string(),
        classification,
        kind,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        rationale: parsed.rationale,
    })
}

/// Looks for source/sink wording in documentation that references the
/// candidate or its file.
pub struct DocumentationAnalyzer;

/// Paragraphs of `content` that mention `name`.
fn mentions<'a>(content: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    content
        .split("\n\n")
        .filter(move |paragraph| !name.is_empty() && paragraph.contains(name))
}

#[async_trait]
impl Analyzer for DocumentationAnalyzer {
    fn name(&self) -> &str {
        DOCUMENTATION_ANALYZER
    }

    async fn analyze(
        &self,
        candidate: &Candidate,
        ctx: &AnalysisContext,
    ) -> Result<Option<Verdict>, WorkflowError> {
        let mut targets = vec![candidate.node_id.as_str()];
        if let Some(file_id) = candidate.file_id.as_deref() {
            if file_id != candidate.node_id {
                targets.push(file_id);
            }
        }

        let mut documents = BTreeSet::new();
        for target in targets {
            let refs = ctx
                .store
                .find_relationships(
                    &RelationshipFilter::of_type(schema::REFERENCES).to_node(target),
                )
                .await?;
            documents.extend(refs.into_iter().map(|r| r.from));
        }

        let mut tally: BTreeMap<Role, Vec<&'static str>> = BTreeMap::new();
        let mut evidence = Vec::new();
        for doc_id in &documents {
            let Some(doc) = ctx.store.get_node(doc_id).await? else {
                continue;
            };
            let Some(content) = doc.prop_str("content") else {
                continue;
            };
            let title = doc.prop_str("title").unwrap_or(doc_id.as_str());
            for paragraph in mentions(content, &candidate.name) {
                for (role, keyword, kind) in keyword_hits(paragraph) {
                    tally.entry(role).or_default().push(kind);
                    let note = format!("'{}' in {}", keyword, title);
                    if !evidence.contains(&note) {
                        evidence.push(note);
                    }
                }
            }
        }

        if tally.is_empty() {
            return Ok(None);
        }

        let sources = tally.get(&Role::Source).map_or(0, Vec::len);
        let sinks = tally.get(&Role::Sink).map_or(0, Vec::len);
        let role = match sources.cmp(&sinks) {
            std::cmp::Ordering::Greater => Role::Source,
            std::cmp::Ordering::Less => Role::Sink,
            std::cmp::Ordering::Equal => {
                return Ok(Some(Verdict {
                    analyzer: DOCUMENTATION_ANALYZER.to_string(),
                    classification: Classification::Neither,
                    kind: None,
                    confidence: 0.5,
                    rationale: format!(
                        "documentation describes both input and output handling: {}",
                        evidence.join(", ")
                    ),
                }));
            }
        };

        let count = sources.max(sinks);
        let kind = tally
            .get(&role)
            .and_then(|kinds| kinds.first())
            .map(|k| k.to_string());
        Ok(Some(Verdict {
            analyzer: DOCUMENTATION_ANALYZER.to_string(),
            classification: role.into(),
            kind,
            confidence: (0.4 + 0.15 * count as f64).min(0.85),
            rationale: format!("documentation evidence: {}", evidence.join(", ")),
        }))
    }
}

/// Analyzers keyed by name.
#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in analyzers. The LLM analyzer is only registered when a
    /// client is supplied.
    pub fn with_defaults(llm: Option<Arc<dyn LLM>>, max_tokens: u32) -> Self {
        Self::built_in(llm, max_tokens, LlmRetry::default())
    }

    /// Built-in analyzers sharing the summarizer's token and retry limits.
    pub fn from_config(llm: Option<Arc<dyn LLM>>, config: &Config) -> Self {
        Self::built_in(
            llm,
            config.summarizer.max_summary_tokens,
            LlmRetry::from(&config.summarizer),
        )
    }

    fn built_in(llm: Option<Arc<dyn LLM>>, max_tokens: u32, retry: LlmRetry) -> Self {
        let mut registry = Self::new();
        if let Some(llm) = llm {
            registry.register(Arc::new(LlmAnalyzer::new(llm, max_tokens).with_retry(retry)));
        }
        registry.register(Arc::new(DocumentationAnalyzer));
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>, WorkflowError> {
        self.analyzers
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownAnalyzer(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.analyzers.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraphStore, NodeDraft, RelationshipDraft};

    #[test]
    fn test_parse_verdict_with_fences() {
        let response = "```json\n{\"classification\": \"sink\", \"kind\": \"database_write\", \"confidence\": 0.9, \"rationale\": \"runs SQL\"}\n```";
        let verdict = parse_verdict("llm", response).unwrap();
        assert_eq!(verdict.classification, Classification::Sink);
        assert_eq!(verdict.kind.as_deref(), Some("database_write"));
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn test_parse_verdict_clamps_and_rejects() {
        let verdict =
            parse_verdict("llm", r#"{"classification": "is_source", "confidence": 3}"#).unwrap();
        assert_eq!(verdict.classification, Classification::Source);
        assert_eq!(verdict.confidence, 1.0);

        assert!(matches!(
            parse_verdict("llm", r#"{"classification": "maybe"}"#),
            Err(WorkflowError::Analyzer(_))
        ));
        assert!(parse_verdict("llm", "I think it is a sink").is_err());
    }

    async fn documented_function(doc: &str) -> (Arc<MemoryGraphStore>, Candidate) {
        let store = Arc::new(MemoryGraphStore::new());
        let func = store
            .create_node(
                NodeDraft::new("s", schema::AST_NODE)
                    .with_label("Function")
                    .property("name", "save_order"),
            )
            .await
            .unwrap();
        let doc_id = store
            .create_node(
                NodeDraft::new("s", schema::DOCUMENTATION)
                    .property("title", "Orders")
                    .property("content", doc),
            )
            .await
            .unwrap();
        store
            .create_relationship(RelationshipDraft::new(&doc_id, schema::REFERENCES, &func, "s"))
            .await
            .unwrap();
        let candidate = Candidate {
            node_id: func,
            name: "save_order".into(),
            kind: "Function".into(),
            ..Candidate::default()
        };
        (store, candidate)
    }

    #[tokio::test]
    async fn test_documentation_analyzer_confirms_sink() {
        let (store, candidate) = documented_function(
            "# Orders\n\nsave_order inserts the order into the database with raw SQL.\n\nUnrelated paragraph about the request cycle.",
        )
        .await;
        let ctx = AnalysisContext {
            store,
            scopes: Vec::new(),
        };
        let verdict = DocumentationAnalyzer
            .analyze(&candidate, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.classification, Classification::Sink);
        assert_eq!(verdict.kind.as_deref(), Some("database_write"));
        assert!(verdict.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_documentation_analyzer_abstains_without_evidence() {
        let (store, candidate) = documented_function("save_order keeps things tidy.").await;
        let ctx = AnalysisContext {
            store,
            scopes: Vec::new(),
        };
        assert!(DocumentationAnalyzer
            .analyze(&candidate, &ctx)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_registry_without_llm() {
        let registry = AnalyzerRegistry::with_defaults(None, 256);
        assert_eq!(registry.names(), vec!["documentation"]);
        assert!(matches!(
            registry.get(LLM_ANALYZER),
            Err(WorkflowError::UnknownAnalyzer(_))
        ));
    }
}
