//! Sources-and-sinks workflow.
//!
//! Runs as an independent pass over an already ingested graph, keyed by an
//! Investigation id rather than an ingestion id:
//!
//! 1. **Query** - every configured [`Funnel`] proposes nodes; the union is
//!    persisted as `Candidate` nodes.
//! 2. **Analyze** - every configured [`Analyzer`] rates every candidate,
//!    fanned out over a bounded stream.
//! 3. **Update** - verdicts are combined under the configured
//!    [`ConflictPolicy`]; confirmed candidates become `Source`/`Sink` nodes
//!    and `DataFlowPath` nodes are inferred between them.
//! 4. **Report** - JSON and Markdown documents plus a `Report` node pointing
//!    at them.
//!
//! Findings are only ever built from candidates, so the confirmed set is
//! always a subset of what the funnels surfaced.

mod analyzer;
mod funnel;
pub mod prompts;
mod report;

pub use analyzer::{
    parse_verdict, AnalysisContext, Analyzer, AnalyzerRegistry, DocumentationAnalyzer,
    LlmAnalyzer, LlmRetry, DOCUMENTATION_ANALYZER, LLM_ANALYZER,
};
pub use funnel::{
    keyword_hits, Funnel, FunnelContext, FunnelHit, FunnelRegistry, SummaryKeywordFunnel,
    SymbolNameFunnel, SUMMARY_KEYWORDS_FUNNEL, SYMBOL_NAMES_FUNNEL,
};
pub use report::{
    report_paths, write_report, AnalysisError, ConflictNote, DataFlow, Finding,
    InvestigationReport, ReportCounts, Severity,
};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, ConfigError, ConflictPolicy, SourcesSinksConfig};
use crate::graph::{
    node_id, schema, GraphError, GraphNode, GraphStore, NodeDraft, Properties, RelationshipDraft,
    RelationshipFilter,
};
use crate::ingest::builder::repository_node_id;
use crate::llm::{LLMError, LLM};
use crate::mapper::source_path;

/// Errors that can occur during an investigation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Graph store error: {0}")]
    Graph(#[from] GraphError),

    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown funnel: {0}")]
    UnknownFunnel(String),

    #[error("Unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Role of a confirmed finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Sink,
}

impl Role {
    /// Graph label of the finding node.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Source => schema::SOURCE,
            Role::Sink => schema::SINK,
        }
    }
}

/// An analyzer's answer for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Source,
    Sink,
    Neither,
}

impl Classification {
    /// Lenient parse of an analyzer's answer.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "source" | "is_source" => Some(Classification::Source),
            "sink" | "is_sink" => Some(Classification::Sink),
            "neither" | "none" | "not_relevant" => Some(Classification::Neither),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Classification::Source => Some(Role::Source),
            Classification::Sink => Some(Role::Sink),
            Classification::Neither => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Source => "source",
            Classification::Sink => "sink",
            Classification::Neither => "neither",
        }
    }
}

impl From<Role> for Classification {
    fn from(role: Role) -> Self {
        match role {
            Role::Source => Classification::Source,
            Role::Sink => Classification::Sink,
        }
    }
}

/// One analyzer's verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub analyzer: String,
    pub classification: Classification,
    /// Finding kind such as `user_input` or `database_write`.
    pub kind: Option<String>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub rationale: String,
}

/// A node surfaced by the query stage.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    /// Id of the File or AST node.
    pub node_id: String,
    pub labels: Vec<String>,
    /// AST kind (`Function`, `Method`, ...) or `File`.
    pub kind: String,
    pub name: String,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub signature: Option<String>,
    pub summary: Option<String>,
    /// Roles suggested by funnels, with the suggested kind.
    pub hints: BTreeMap<Role, Option<String>>,
    pub funnels: Vec<String>,
    pub reasons: Vec<String>,
}

/// Id of the Candidate node for `target` in an investigation.
pub fn candidate_node_id(investigation_id: &str, target: &str) -> String {
    node_id(investigation_id, schema::CANDIDATE, target)
}

/// A role confirmed for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleDecision {
    pub role: Role,
    pub kind: Option<String>,
    pub confidence: f64,
    pub rationale: String,
    pub analyzers: Vec<String>,
}

/// Combines the verdicts on one candidate under `policy`.
///
/// A verdict confirms a role when it names that role with at least
/// `threshold` confidence. Abstaining analyzers are not in `verdicts` and do
/// not vote. A candidate may be confirmed as both a source and a sink.
pub fn decide(verdicts: &[Verdict], threshold: f64, policy: ConflictPolicy) -> Vec<RoleDecision> {
    let voters = verdicts.len();
    let mut decisions = Vec::new();

    for role in [Role::Source, Role::Sink] {
        let confirming: Vec<&Verdict> = verdicts
            .iter()
            .filter(|v| v.classification.role() == Some(role) && v.confidence >= threshold)
            .collect();
        let accepted = match policy {
            ConflictPolicy::Any => !confirming.is_empty(),
            ConflictPolicy::Majority => confirming.len() * 2 > voters,
            ConflictPolicy::Unanimous => voters > 0 && confirming.len() == voters,
        };
        if !accepted {
            continue;
        }
        let Some(best) = confirming
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            continue;
        };
        decisions.push(RoleDecision {
            role,
            kind: best
                .kind
                .clone()
                .or_else(|| confirming.iter().find_map(|v| v.kind.clone())),
            confidence: best.confidence,
            rationale: confirming
                .iter()
                .map(|v| format!("{}: {}", v.analyzer, v.rationale))
                .collect::<Vec<_>>()
                .join("; "),
            analyzers: confirming.iter().map(|v| v.analyzer.clone()).collect(),
        });
    }
    decisions
}

/// Whether the verdicts disagree on the classification.
pub fn has_conflict(verdicts: &[Verdict]) -> bool {
    verdicts
        .iter()
        .map(|v| v.classification)
        .collect::<HashSet<_>>()
        .len()
        > 1
}

/// Resolved workflow settings.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub confidence_threshold: f64,
    pub conflict_policy: ConflictPolicy,
    pub max_parallel: usize,
    pub reports_dir: PathBuf,
    pub max_call_depth: usize,
    pub analyzer_timeout: Duration,
    pub funnels: Vec<String>,
    pub analyzers: Vec<String>,
}

impl WorkflowSettings {
    /// Threshold and policy have no defaults and must be configured.
    pub fn from_config(config: &SourcesSinksConfig) -> Result<Self, ConfigError> {
        let confidence_threshold = config.confidence_threshold.ok_or_else(|| {
            ConfigError::Missing("sources_sinks.confidence_threshold".to_string())
        })?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "sources_sinks.confidence_threshold must be within [0, 1], got {}",
                confidence_threshold
            )));
        }
        let conflict_policy = config
            .conflict_policy
            .ok_or_else(|| ConfigError::Missing("sources_sinks.conflict_policy".to_string()))?;

        Ok(Self {
            confidence_threshold,
            conflict_policy,
            max_parallel: config.max_parallel.max(1),
            reports_dir: config.reports_dir.clone(),
            max_call_depth: config.max_call_depth,
            analyzer_timeout: Duration::from_secs(config.analyzer_timeout_secs),
            funnels: config.funnels.clone(),
            analyzers: config.analyzers.clone(),
        })
    }
}

struct CandidateAnalysis {
    index: usize,
    verdicts: Vec<Verdict>,
    errors: Vec<AnalysisError>,
}

#[derive(Default)]
struct UpdateOutcome {
    sources: Vec<Finding>,
    sinks: Vec<Finding>,
    data_flow_paths: Vec<DataFlow>,
    conflicts: Vec<ConflictNote>,
    errors: Vec<AnalysisError>,
    rejected: usize,
}

/// Drives investigations over the shared graph.
pub struct SourcesSinksWorkflow {
    store: Arc<dyn GraphStore>,
    funnels: Vec<Arc<dyn Funnel>>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    settings: WorkflowSettings,
}

impl SourcesSinksWorkflow {
    /// Resolves the configured funnel and analyzer names against the
    /// registries.
    pub fn new(
        store: Arc<dyn GraphStore>,
        funnels: &FunnelRegistry,
        analyzers: &AnalyzerRegistry,
        settings: WorkflowSettings,
    ) -> Result<Self, WorkflowError> {
        let funnels = settings
            .funnels
            .iter()
            .map(|name| funnels.get(name))
            .collect::<Result<Vec<_>, _>>()?;
        let analyzers = settings
            .analyzers
            .iter()
            .map(|name| analyzers.get(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            store,
            funnels,
            analyzers,
            settings,
        })
    }

    /// Workflow over the built-in registries.
    pub fn from_config(
        store: Arc<dyn GraphStore>,
        llm: Option<Arc<dyn LLM>>,
        config: &Config,
    ) -> Result<Self, WorkflowError> {
        let settings = WorkflowSettings::from_config(&config.sources_sinks)?;
        let analyzers = AnalyzerRegistry::from_config(llm, config);
        Self::new(store, &FunnelRegistry::with_defaults(), &analyzers, settings)
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Creates an Investigation root over the given ingestions. An empty
    /// list searches the whole graph.
    pub async fn create_investigation(
        &self,
        repository_ids: &[String],
    ) -> Result<String, WorkflowError> {
        for repo in repository_ids {
            if self.store.get_node(&repository_node_id(repo)).await?.is_none() {
                return Err(WorkflowError::NotFound(format!("repository {}", repo)));
            }
        }

        let id = format!("investigation-{}", Uuid::new_v4());
        self.store
            .create_node(
                NodeDraft::new(&id, schema::INVESTIGATION)
                    .with_id(&id)
                    .property("repository_ids", repository_ids.to_vec())
                    .property("created_at", Utc::now().to_rfc3339()),
            )
            .await?;
        tracing::info!(investigation_id = %id, repositories = repository_ids.len(), "investigation created");
        Ok(id)
    }

    /// Deletes an investigation and everything it produced.
    pub async fn delete_investigation(&self, investigation_id: &str) -> Result<(), WorkflowError> {
        self.load_investigation(investigation_id).await?;
        self.store.delete_scope(investigation_id).await?;
        tracing::info!(investigation_id, "investigation deleted");
        Ok(())
    }

    /// Runs all four stages. A rerun replaces the previous results.
    pub async fn run(&self, investigation_id: &str) -> Result<InvestigationReport, WorkflowError> {
        let investigation = self.load_investigation(investigation_id).await?;
        let scopes: Vec<String> = investigation
            .properties
            .get("repository_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        self.reset(&investigation).await?;

        let candidates = self.query(investigation_id, &scopes).await?;
        tracing::info!(investigation_id, candidates = candidates.len(), "query stage finished");

        let analyses = self.analyze(&candidates, &scopes).await;
        let outcome = self
            .update(investigation_id, &candidates, analyses, &scopes)
            .await?;
        tracing::info!(
            investigation_id,
            sources = outcome.sources.len(),
            sinks = outcome.sinks.len(),
            data_flow_paths = outcome.data_flow_paths.len(),
            "update stage finished"
        );

        self.report(investigation_id, scopes, candidates.len(), outcome)
            .await
    }

    async fn load_investigation(&self, id: &str) -> Result<GraphNode, WorkflowError> {
        match self.store.get_node(id).await? {
            Some(node) if node.has_label(schema::INVESTIGATION) => Ok(node),
            _ => Err(WorkflowError::NotFound(format!("investigation {}", id))),
        }
    }

    /// Clears earlier results, keeping the Investigation root.
    async fn reset(&self, investigation: &GraphNode) -> Result<(), WorkflowError> {
        self.store.delete_scope(&investigation.scope).await?;
        self.store
            .create_node(NodeDraft {
                id: Some(investigation.id.clone()),
                labels: investigation.labels.clone(),
                scope: investigation.scope.clone(),
                properties: investigation.properties.clone(),
            })
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    async fn query(
        &self,
        investigation_id: &str,
        scopes: &[String],
    ) -> Result<Vec<Candidate>, WorkflowError> {
        let ctx = FunnelContext {
            store: self.store.clone(),
            scopes: scopes.to_vec(),
        };

        let mut hits: BTreeMap<String, Vec<(String, FunnelHit)>> = BTreeMap::new();
        for funnel in &self.funnels {
            let found = funnel.find_candidates(&ctx).await?;
            tracing::debug!(funnel = funnel.name(), hits = found.len(), "funnel finished");
            for hit in found {
                hits.entry(hit.node_id.clone())
                    .or_default()
                    .push((funnel.name().to_string(), hit));
            }
        }

        let mut candidates = Vec::with_capacity(hits.len());
        for (target, hits) in hits {
            let Some(node) = self.store.get_node(&target).await? else {
                tracing::warn!(node_id = %target, "funnel proposed a node that does not exist");
                continue;
            };
            let candidate = self.build_candidate(node, hits).await?;

            let id = candidate_node_id(investigation_id, &candidate.node_id);
            self.store
                .create_node(
                    NodeDraft::new(investigation_id, schema::CANDIDATE)
                        .with_id(&id)
                        .property("status", "candidate")
                        .property("target_id", candidate.node_id.clone())
                        .property("name", candidate.name.clone())
                        .property("target_kind", candidate.kind.clone())
                        .property("funnels", candidate.funnels.clone())
                        .property("reasons", candidate.reasons.clone()),
                )
                .await?;
            self.store
                .create_relationship(RelationshipDraft::new(
                    &id,
                    schema::IDENTIFIES,
                    &candidate.node_id,
                    investigation_id,
                ))
                .await?;
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    async fn build_candidate(
        &self,
        node: GraphNode,
        hits: Vec<(String, FunnelHit)>,
    ) -> Result<Candidate, WorkflowError> {
        let kind = node
            .labels
            .iter()
            .find(|l| schema::AST_KINDS.contains(&l.as_str()))
            .or_else(|| node.labels.first())
            .cloned()
            .unwrap_or_default();

        let (file_id, file_path) = if node.has_label(schema::FILE) {
            (Some(node.id.clone()), node.prop_str("path").map(String::from))
        } else {
            let file_id = node.prop_str(schema::MAPPED_FILE_ID).map(String::from);
            let file_path = match &file_id {
                Some(id) => self
                    .store
                    .get_node(id)
                    .await?
                    .and_then(|f| f.prop_str("path").map(String::from)),
                None => None,
            };
            (file_id, file_path.or_else(|| source_path(&node).map(String::from)))
        };

        let mut candidate = Candidate {
            name: node
                .prop_str("name")
                .or_else(|| node.prop_str("path"))
                .unwrap_or(node.id.as_str())
                .to_string(),
            signature: node.prop_str("signature").map(String::from),
            summary: node.prop_str("summary").map(String::from),
            node_id: node.id,
            labels: node.labels,
            kind,
            file_id,
            file_path,
            ..Candidate::default()
        };
        for (funnel, hit) in hits {
            if let Some(role) = hit.role {
                candidate.hints.entry(role).or_insert(hit.kind);
            }
            if !candidate.funnels.contains(&funnel) {
                candidate.funnels.push(funnel);
            }
            candidate.reasons.push(hit.reason);
        }
        Ok(candidate)
    }

    // ------------------------------------------------------------------
    // Analyze
    // ------------------------------------------------------------------

    async fn analyze(&self, candidates: &[Candidate], scopes: &[String]) -> Vec<CandidateAnalysis> {
        let ctx = AnalysisContext {
            store: self.store.clone(),
            scopes: scopes.to_vec(),
        };
        let ctx = &ctx;
        let timeout = self.settings.analyzer_timeout;

        let mut analyses: Vec<CandidateAnalysis> = stream::iter(candidates.iter().enumerate())
            .map(|(index, candidate)| async move {
                let runs = self.analyzers.iter().map(|analyzer| async move {
                    let outcome =
                        tokio::time::timeout(timeout, analyzer.analyze(candidate, ctx)).await;
                    (analyzer.name().to_string(), outcome)
                });

                let mut analysis = CandidateAnalysis {
                    index,
                    verdicts: Vec::new(),
                    errors: Vec::new(),
                };
                for (analyzer, outcome) in futures::future::join_all(runs).await {
                    let message = match outcome {
                        Ok(Ok(Some(verdict))) => {
                            analysis.verdicts.push(verdict);
                            continue;
                        }
                        Ok(Ok(None)) => continue,
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => format!("timed out after {}s", timeout.as_secs()),
                    };
                    tracing::warn!(
                        node_id = %candidate.node_id,
                        analyzer = %analyzer,
                        error = %message,
                        "analyzer failed"
                    );
                    analysis.errors.push(AnalysisError {
                        node_id: candidate.node_id.clone(),
                        analyzer,
                        message,
                    });
                }
                analysis
            })
            .buffer_unordered(self.settings.max_parallel)
            .collect()
            .await;

        analyses.sort_by_key(|a| a.index);
        analyses
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    async fn update(
        &self,
        investigation_id: &str,
        candidates: &[Candidate],
        analyses: Vec<CandidateAnalysis>,
        scopes: &[String],
    ) -> Result<UpdateOutcome, WorkflowError> {
        let mut outcome = UpdateOutcome::default();

        for (candidate, analysis) in candidates.iter().zip(analyses) {
            outcome.errors.extend(analysis.errors);

            let decisions = decide(
                &analysis.verdicts,
                self.settings.confidence_threshold,
                self.settings.conflict_policy,
            );
            let conflict = has_conflict(&analysis.verdicts);

            let mut props = Properties::new();
            let status = if decisions.is_empty() {
                "rejected"
            } else {
                "confirmed"
            };
            props.insert("status".into(), status.into());
            props.insert("conflict".into(), conflict.into());
            props.insert("verdicts".into(), serde_json::to_value(&analysis.verdicts)?);
            self.store
                .update_properties(
                    &candidate_node_id(investigation_id, &candidate.node_id),
                    props,
                )
                .await?;

            if conflict {
                outcome.conflicts.push(ConflictNote {
                    node_id: candidate.node_id.clone(),
                    name: candidate.name.clone(),
                    verdicts: analysis.verdicts.clone(),
                });
            }
            if decisions.is_empty() {
                outcome.rejected += 1;
            }

            for decision in decisions {
                let finding = self
                    .write_finding(investigation_id, candidate, decision, conflict)
                    .await?;
                match finding.role {
                    Role::Source => outcome.sources.push(finding),
                    Role::Sink => outcome.sinks.push(finding),
                }
            }
        }

        outcome.data_flow_paths = self
            .infer_data_flow(investigation_id, &outcome.sources, &outcome.sinks, scopes)
            .await?;
        Ok(outcome)
    }

    async fn write_finding(
        &self,
        investigation_id: &str,
        candidate: &Candidate,
        decision: RoleDecision,
        conflict: bool,
    ) -> Result<Finding, WorkflowError> {
        let role = decision.role;
        let id = node_id(investigation_id, role.label(), &candidate.node_id);
        let kind = decision
            .kind
            .or_else(|| candidate.hints.get(&role).cloned().flatten())
            .unwrap_or_else(|| "unspecified".to_string());

        self.store
            .create_node(
                NodeDraft::new(investigation_id, role.label())
                    .with_id(&id)
                    .property("kind", kind.clone())
                    .property("confidence", decision.confidence)
                    .property("rationale", decision.rationale.clone())
                    .property("analyzers", decision.analyzers.clone())
                    .property("conflict", conflict)
                    .property("target_id", candidate.node_id.clone())
                    .property("name", candidate.name.clone())
                    .optional_property("file_path", candidate.file_path.clone()),
            )
            .await?;
        self.store
            .create_relationship(RelationshipDraft::new(
                &id,
                schema::IDENTIFIES,
                &candidate.node_id,
                investigation_id,
            ))
            .await?;
        if let Some(file_id) = &candidate.file_id {
            self.store
                .create_relationship(RelationshipDraft::new(
                    &id,
                    schema::FOUND_IN,
                    file_id,
                    investigation_id,
                ))
                .await?;
        }

        Ok(Finding {
            id,
            role,
            target_id: candidate.node_id.clone(),
            name: candidate.name.clone(),
            target_kind: candidate.kind.clone(),
            kind,
            confidence: decision.confidence,
            rationale: decision.rationale,
            file_id: candidate.file_id.clone(),
            file_path: candidate.file_path.clone(),
            analyzers: decision.analyzers,
            conflict,
        })
    }

    async fn infer_data_flow(
        &self,
        investigation_id: &str,
        sources: &[Finding],
        sinks: &[Finding],
        scopes: &[String],
    ) -> Result<Vec<DataFlow>, WorkflowError> {
        if sources.is_empty() || sinks.is_empty() {
            return Ok(Vec::new());
        }
        let graph = self.flow_graph(scopes).await?;

        let mut paths = Vec::new();
        for source in sources {
            for sink in sinks {
                let Some((severity, hops, rationale)) =
                    assess_flow(source, sink, &graph, self.settings.max_call_depth)
                else {
                    continue;
                };
                let id = node_id(
                    investigation_id,
                    schema::DATA_FLOW_PATH,
                    &format!("{}->{}", source.id, sink.id),
                );
                self.store
                    .create_node(
                        NodeDraft::new(investigation_id, schema::DATA_FLOW_PATH)
                            .with_id(&id)
                            .property("source_id", source.id.clone())
                            .property("sink_id", sink.id.clone())
                            .property("severity", severity.as_str())
                            .property("rationale", rationale.clone())
                            .optional_property("hops", hops),
                    )
                    .await?;
                self.store
                    .create_relationship(RelationshipDraft::new(
                        &id,
                        schema::FLOWS_FROM,
                        &source.id,
                        investigation_id,
                    ))
                    .await?;
                self.store
                    .create_relationship(RelationshipDraft::new(
                        &id,
                        schema::FLOWS_TO,
                        &sink.id,
                        investigation_id,
                    ))
                    .await?;

                paths.push(DataFlow {
                    id,
                    source_id: source.id.clone(),
                    sink_id: sink.id.clone(),
                    source_name: source.name.clone(),
                    sink_name: sink.name.clone(),
                    severity,
                    hops,
                    rationale,
                });
            }
        }
        paths.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
        Ok(paths)
    }

    async fn flow_graph(&self, scopes: &[String]) -> Result<FlowGraph, WorkflowError> {
        let in_scope = |scope: &String| scopes.is_empty() || scopes.contains(scope);
        let mut graph = FlowGraph::default();
        for rel in self
            .store
            .find_relationships(&RelationshipFilter::of_type(schema::CALLS))
            .await?
        {
            if in_scope(&rel.scope) {
                graph.add_call(rel.from, rel.to);
            }
        }
        for rel in self
            .store
            .find_relationships(&RelationshipFilter::of_type(schema::CONTAINS))
            .await?
        {
            if in_scope(&rel.scope) {
                graph.add_contains(rel.from, rel.to);
            }
        }
        Ok(graph)
    }

    // ------------------------------------------------------------------
    // Report
    // ------------------------------------------------------------------

    async fn report(
        &self,
        investigation_id: &str,
        repository_ids: Vec<String>,
        candidates: usize,
        outcome: UpdateOutcome,
    ) -> Result<InvestigationReport, WorkflowError> {
        let (json_path, markdown_path) = report_paths(&self.settings.reports_dir, investigation_id);
        let counts = ReportCounts {
            candidates,
            sources: outcome.sources.len(),
            sinks: outcome.sinks.len(),
            data_flow_paths: outcome.data_flow_paths.len(),
            rejected: outcome.rejected,
            conflicts: outcome.conflicts.len(),
            analysis_errors: outcome.errors.len(),
        };
        let report = InvestigationReport {
            investigation_id: investigation_id.to_string(),
            repository_ids,
            generated_at: Utc::now(),
            funnels: self.settings.funnels.clone(),
            analyzers: self.settings.analyzers.clone(),
            confidence_threshold: self.settings.confidence_threshold,
            conflict_policy: self.settings.conflict_policy,
            counts,
            sources: outcome.sources,
            sinks: outcome.sinks,
            data_flow_paths: outcome.data_flow_paths,
            conflicts: outcome.conflicts,
            analysis_errors: outcome.errors,
            report_location: Some(json_path.to_string_lossy().into_owned()),
        };
        write_report(&report, &json_path, &markdown_path).await?;

        let id = node_id(investigation_id, schema::REPORT, investigation_id);
        self.store
            .create_node(
                NodeDraft::new(investigation_id, schema::REPORT)
                    .with_id(&id)
                    .property("report_location", json_path.to_string_lossy().into_owned())
                    .property(
                        "markdown_location",
                        markdown_path.to_string_lossy().into_owned(),
                    )
                    .property("generated_at", report.generated_at.to_rfc3339())
                    .property("candidates", counts.candidates)
                    .property("sources", counts.sources)
                    .property("sinks", counts.sinks)
                    .property("data_flow_paths", counts.data_flow_paths),
            )
            .await?;
        self.store
            .create_relationship(RelationshipDraft::new(
                investigation_id,
                schema::CONTAINS,
                &id,
                investigation_id,
            ))
            .await?;

        tracing::info!(
            investigation_id,
            report = %json_path.display(),
            "report written"
        );
        Ok(report)
    }
}

/// Adjacency over `CALLS` edges.
#[derive(Debug, Default)]
struct FlowGraph {
    calls: HashMap<String, Vec<String>>,
    /// Child to its `CONTAINS` parent.
    parents: HashMap<String, String>,
}

impl FlowGraph {
    fn add_call(&mut self, from: String, to: String) {
        self.calls.entry(from).or_default().push(to);
    }

    fn add_contains(&mut self, parent: String, child: String) {
        self.parents.insert(child, parent);
    }

    fn parent(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    /// Fewest call hops from `from` to `to`, if within `max_depth`.
    fn distance(&self, from: &str, to: &str, max_depth: usize) -> Option<usize> {
        let mut seen: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(from, 0)]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for next in self.calls.get(node).into_iter().flatten() {
                if next == to {
                    return Some(depth + 1);
                }
                if seen.insert(next.as_str()) {
                    queue.push_back((next.as_str(), depth + 1));
                }
            }
        }
        None
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Severity, hop count and rationale of a possible source to sink flow.
fn assess_flow(
    source: &Finding,
    sink: &Finding,
    graph: &FlowGraph,
    max_depth: usize,
) -> Option<(Severity, Option<usize>, String)> {
    if source.target_id == sink.target_id {
        return Some((
            Severity::High,
            Some(0),
            format!("{} both receives untrusted data and reaches a sink", source.name),
        ));
    }

    let linked = graph
        .distance(&source.target_id, &sink.target_id, max_depth)
        .map(|hops| (hops, "calls"))
        .or_else(|| {
            graph
                .distance(&sink.target_id, &source.target_id, max_depth)
                .map(|hops| (hops, "is called by"))
        });
    if let Some((hops, direction)) = linked {
        let severity = if hops == 1 {
            Severity::High
        } else {
            Severity::Medium
        };
        return Some((
            severity,
            Some(hops),
            format!("{} {} {} ({} call hop(s))", source.name, direction, sink.name, hops),
        ));
    }

    let (Some(a), Some(b)) = (source.file_id.as_deref(), sink.file_id.as_deref()) else {
        return None;
    };
    if a == b {
        return Some((
            Severity::Medium,
            None,
            format!("{} and {} are defined in the same file", source.name, sink.name),
        ));
    }

    // Same Directory node, so files of different repositories never pair up.
    let dir = graph.parent(a)?;
    (graph.parent(b) == Some(dir)).then(|| {
        let shown = source
            .file_path
            .as_deref()
            .map(parent_dir)
            .filter(|d| !d.is_empty())
            .unwrap_or("the repository root");
        (
            Severity::Low,
            None,
            format!("{} and {} share {}", source.name, sink.name, shown),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(analyzer: &str, classification: Classification, confidence: f64) -> Verdict {
        Verdict {
            analyzer: analyzer.to_string(),
            classification,
            kind: None,
            confidence,
            rationale: format!("{} says so", analyzer),
        }
    }

    #[test]
    fn test_has_conflict() {
        let agreeing = vec![
            verdict("llm", Classification::Sink, 0.9),
            verdict("documentation", Classification::Sink, 0.6),
        ];
        assert!(!has_conflict(&agreeing));
        assert!(!has_conflict(&[]));

        let split = vec![
            verdict("llm", Classification::Source, 0.9),
            verdict("documentation", Classification::Sink, 0.6),
            verdict("other", Classification::Source, 0.8),
        ];
        assert!(has_conflict(&split));
    }

    #[test]
    fn test_decide_any() {
        let verdicts = vec![
            verdict("llm", Classification::Sink, 0.9),
            verdict("documentation", Classification::Neither, 0.6),
        ];
        let decisions = decide(&verdicts, 0.7, ConflictPolicy::Any);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].role, Role::Sink);
        assert_eq!(decisions[0].analyzers, vec!["llm"]);
        assert!(has_conflict(&verdicts));

        // Below threshold never confirms.
        let weak = vec![verdict("llm", Classification::Sink, 0.5)];
        assert!(decide(&weak, 0.7, ConflictPolicy::Any).is_empty());
    }

    #[test]
    fn test_decide_majority_and_unanimous() {
        let split = vec![
            verdict("a", Classification::Source, 0.9),
            verdict("b", Classification::Neither, 0.9),
        ];
        assert!(decide(&split, 0.5, ConflictPolicy::Majority).is_empty());
        assert!(decide(&split, 0.5, ConflictPolicy::Unanimous).is_empty());

        let agreed = vec![
            verdict("a", Classification::Source, 0.9),
            verdict("b", Classification::Source, 0.8),
            verdict("c", Classification::Neither, 0.4),
        ];
        assert_eq!(decide(&agreed, 0.5, ConflictPolicy::Majority).len(), 1);
        assert!(decide(&agreed, 0.5, ConflictPolicy::Unanimous).is_empty());
        assert_eq!(decide(&agreed[..2], 0.5, ConflictPolicy::Unanimous).len(), 1);

        assert!(decide(&[], 0.5, ConflictPolicy::Unanimous).is_empty());
    }

    #[test]
    fn test_decide_both_roles() {
        let verdicts = vec![
            verdict("a", Classification::Source, 0.9),
            verdict("b", Classification::Sink, 0.8),
        ];
        let roles: Vec<Role> = decide(&verdicts, 0.5, ConflictPolicy::Any)
            .into_iter()
            .map(|d| d.role)
            .collect();
        assert_eq!(roles, vec![Role::Source, Role::Sink]);
    }

    #[test]
    fn test_classification_parse() {
        assert_eq!(Classification::parse(" Is-Sink "), Some(Classification::Sink));
        assert_eq!(Classification::parse("none"), Some(Classification::Neither));
        assert_eq!(Classification::parse("perhaps"), None);
    }

    #[test]
    fn test_settings_require_threshold_and_policy() {
        let mut config = SourcesSinksConfig::default();
        assert!(matches!(
            WorkflowSettings::from_config(&config),
            Err(ConfigError::Missing(_))
        ));
        config.confidence_threshold = Some(0.7);
        assert!(matches!(
            WorkflowSettings::from_config(&config),
            Err(ConfigError::Missing(_))
        ));
        config.conflict_policy = Some(ConflictPolicy::Majority);
        let settings = WorkflowSettings::from_config(&config).unwrap();
        assert_eq!(settings.conflict_policy, ConflictPolicy::Majority);

        config.confidence_threshold = Some(1.5);
        assert!(matches!(
            WorkflowSettings::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    fn finding(id: &str, target: &str, file: Option<&str>, path: Option<&str>) -> Finding {
        Finding {
            id: id.to_string(),
            role: Role::Source,
            target_id: target.to_string(),
            name: target.to_string(),
            target_kind: "Function".to_string(),
            kind: "unspecified".to_string(),
            confidence: 0.9,
            rationale: String::new(),
            file_id: file.map(String::from),
            file_path: path.map(String::from),
            analyzers: Vec::new(),
            conflict: false,
        }
    }

    #[test]
    fn test_call_distance() {
        let mut calls = FlowGraph::default();
        calls.add_call("a".into(), "b".into());
        calls.add_call("b".into(), "c".into());
        calls.add_call("c".into(), "a".into());
        assert_eq!(calls.distance("a", "b", 3), Some(1));
        assert_eq!(calls.distance("a", "c", 3), Some(2));
        assert_eq!(calls.distance("a", "c", 1), None);
        assert_eq!(calls.distance("a", "zz", 5), None);
    }

    #[test]
    fn test_assess_flow_severity() {
        let mut graph = FlowGraph::default();
        graph.add_call("read".into(), "mid".into());
        graph.add_call("mid".into(), "write".into());
        for (dir, file) in [("d-app", "f1"), ("d-app", "f3"), ("d-lib", "f2"), ("d-tools", "f4")] {
            graph.add_contains(dir.into(), file.into());
        }

        let source = finding("s", "read", Some("f1"), Some("app/a.py"));
        let same = finding("k0", "read", Some("f1"), Some("app/a.py"));
        assert_eq!(assess_flow(&source, &same, &graph, 3).unwrap().0, Severity::High);

        let via_calls = finding("k1", "write", Some("f2"), Some("lib/b.py"));
        let (severity, hops, _) = assess_flow(&source, &via_calls, &graph, 3).unwrap();
        assert_eq!((severity, hops), (Severity::Medium, Some(2)));
        assert!(assess_flow(&source, &via_calls, &graph, 1).is_none());

        let same_file = finding("k2", "other", Some("f1"), Some("app/a.py"));
        assert_eq!(assess_flow(&source, &same_file, &graph, 3).unwrap().0, Severity::Medium);

        let same_dir = finding("k3", "other", Some("f3"), Some("app/c.py"));
        assert_eq!(assess_flow(&source, &same_dir, &graph, 3).unwrap().0, Severity::Low);

        let unrelated = finding("k4", "other", Some("f4"), Some("tools/d.py"));
        assert!(assess_flow(&source, &unrelated, &graph, 3).is_none());
    }

    #[test]
    fn test_root_files_of_different_repositories_do_not_flow() {
        let mut graph = FlowGraph::default();
        graph.add_contains("root-one".into(), "f1".into());
        graph.add_contains("root-two".into(), "f2".into());
        graph.add_contains("root-one".into(), "f3".into());

        let source = finding("s", "read", Some("f1"), Some("a.py"));
        let other_repo = finding("k", "write", Some("f2"), Some("b.py"));
        assert!(assess_flow(&source, &other_repo, &graph, 3).is_none());

        let same_root = finding("k2", "write", Some("f3"), Some("c.py"));
        let (severity, _, rationale) = assess_flow(&source, &same_root, &graph, 3).unwrap();
        assert_eq!(severity, Severity::Low);
        assert!(rationale.contains("the repository root"));
    }
}
