use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Role, Verdict, WorkflowError};
use crate::config::ConflictPolicy;

/// A confirmed Source or Sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Id of the Source/Sink node.
    pub id: String,
    pub role: Role,
    /// Id of the File or AST node it identifies.
    pub target_id: String,
    pub name: String,
    pub target_kind: String,
    pub kind: String,
    pub confidence: f64,
    pub rationale: String,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    /// Analyzers whose verdicts confirmed it.
    pub analyzers: Vec<String>,
    /// Whether analyzers disagreed.
    pub conflict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// An inferred Source to Sink path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    pub id: String,
    pub source_id: String,
    pub sink_id: String,
    pub source_name: String,
    pub sink_name: String,
    pub severity: Severity,
    /// Call hops between the two, when linked through `CALLS`.
    pub hops: Option<usize>,
    pub rationale: String,
}

/// Verdicts that disagreed on one candidate, kept for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictNote {
    pub node_id: String,
    pub name: String,
    pub verdicts: Vec<Verdict>,
}

/// An analyzer that failed or timed out on a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub node_id: String,
    pub analyzer: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub candidates: usize,
    pub sources: usize,
    pub sinks: usize,
    pub data_flow_paths: usize,
    pub rejected: usize,
    pub conflicts: usize,
    pub analysis_errors: usize,
}

/// Result of one investigation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub investigation_id: String,
    /// Ingestion ids searched; empty for the whole graph.
    pub repository_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub funnels: Vec<String>,
    pub analyzers: Vec<String>,
    pub confidence_threshold: f64,
    pub conflict_policy: ConflictPolicy,
    pub counts: ReportCounts,
    pub sources: Vec<Finding>,
    pub sinks: Vec<Finding>,
    pub data_flow_paths: Vec<DataFlow>,
    pub conflicts: Vec<ConflictNote>,
    pub analysis_errors: Vec<AnalysisError>,
    /// Where the JSON report was written.
    pub report_location: Option<String>,
}

impl InvestigationReport {
    /// Converts the report to markdown format.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# Sources and Sinks: {}\n\n", self.investigation_id));
        md.push_str(&format!(
            "Generated {} with funnels [{}], analyzers [{}], threshold {:.2}, policy {:?}.\n\n",
            self.generated_at.to_rfc3339(),
            self.funnels.join(", "),
            self.analyzers.join(", "),
            self.confidence_threshold,
            self.conflict_policy,
        ));
        if !self.repository_ids.is_empty() {
            md.push_str(&format!("Repositories: {}\n\n", self.repository_ids.join(", ")));
        }

        md.push_str("## Summary\n\n");
        md.push_str("| Candidates | Sources | Sinks | Data flow paths | Rejected | Conflicts |\n");
        md.push_str("|---|---|---|---|---|---|\n");
        let c = &self.counts;
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n\n",
            c.candidates, c.sources, c.sinks, c.data_flow_paths, c.rejected, c.conflicts
        ));

        md.push_str("## Sources\n\n");
        push_findings(&mut md, &self.sources);
        md.push_str("## Sinks\n\n");
        push_findings(&mut md, &self.sinks);

        md.push_str("## Data Flow Paths\n\n");
        if self.data_flow_paths.is_empty() {
            md.push_str("None.\n\n");
        }
        for flow in &self.data_flow_paths {
            md.push_str(&format!(
                "- **{}** `{}` -> `{}`: {}\n",
                flow.severity.as_str(),
                flow.source_name,
                flow.sink_name,
                flow.rationale
            ));
        }
        if !self.data_flow_paths.is_empty() {
            md.push('\n');
        }

        if !self.conflicts.is_empty() {
            md.push_str("## Conflicting Verdicts\n\n");
            for note in &self.conflicts {
                md.push_str(&format!("### {}\n\n", note.name));
                for v in &note.verdicts {
                    md.push_str(&format!(
                        "- {}: {} ({:.2}) {}\n",
                        v.analyzer,
                        v.classification.as_str(),
                        v.confidence,
                        v.rationale
                    ));
                }
                md.push('\n');
            }
        }

        if !self.analysis_errors.is_empty() {
            md.push_str("## Analyzer Errors\n\n");
            for e in &self.analysis_errors {
                md.push_str(&format!("- {} on {}: {}\n", e.analyzer, e.node_id, e.message));
            }
        }

        md
    }
}

fn push_findings(md: &mut String, findings: &[Finding]) {
    if findings.is_empty() {
        md.push_str("None.\n\n");
        return;
    }
    for f in findings {
        let location = f.file_path.as_deref().unwrap_or("unknown file");
        md.push_str(&format!(
            "- **{}** ({}) `{}` in {} [{:.2}]{}\n  {}\n",
            f.name,
            f.kind,
            f.target_kind,
            location,
            f.confidence,
            if f.conflict { " (conflicting verdicts)" } else { "" },
            f.rationale
        ));
    }
    md.push('\n');
}

/// JSON and Markdown paths for an investigation's report.
pub fn report_paths(dir: &Path, investigation_id: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.json", investigation_id)),
        dir.join(format!("{}.md", investigation_id)),
    )
}

/// Writes both report documents.
pub async fn write_report(
    report: &InvestigationReport,
    json_path: &Path,
    markdown_path: &Path,
) -> Result<(), WorkflowError> {
    if let Some(dir) = json_path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(json_path, json).await?;
    tokio::fs::write(markdown_path, report.to_markdown()).await?;
    Ok(())
}
