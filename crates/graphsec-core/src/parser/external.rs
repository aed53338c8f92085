//! External parser tool, run natively or inside a container.
//!
//! The tool receives the repository root and prints one JSON object per line:
//!
//! ```text
//! {"type":"node","id":"n1","kind":"Function","name":"f","file_path":"/workspace/a.py","start_line":1}
//! {"type":"edge","from":"n0","to":"n1","rel":"DECLARES"}
//! ```
//!
//! Whichever path property the tool uses (`file_path`, `path` or `full_path`)
//! is kept as is; only a container mount prefix is rewritten back to the
//! repository root.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{CodeParser, ParseContext, ParseReport, ParserError};
use crate::config::ExternalParserConfig;
use crate::error::{ItemError, ItemErrorKind, Stage};
use crate::graph::{node_id, schema, NodeDraft, RelationshipDraft};

pub const EXTERNAL_PARSER: &str = "external";

/// Where the tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Native,
    Container,
}

/// Parser delegating to a configured command-line tool.
pub struct ExternalToolParser {
    config: ExternalParserConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ToolRecord {
    Node {
        id: String,
        kind: String,
        name: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Edge {
        from: String,
        to: String,
        #[serde(default = "default_rel")]
        rel: String,
    },
}

fn default_rel() -> String {
    schema::DECLARES.to_string()
}

impl ExternalToolParser {
    pub fn new(config: ExternalParserConfig) -> Self {
        Self { config }
    }

    /// Decide how the tool would run on this host.
    pub fn execution_mode(&self) -> Result<ExecutionMode, ParserError> {
        let platform_ok = self
            .config
            .native_platforms
            .iter()
            .any(|p| p == std::env::consts::OS);

        if let Some(command) = &self.config.command {
            if !self.config.force_container && platform_ok && which::which(command).is_ok() {
                return Ok(ExecutionMode::Native);
            }
        }

        match &self.config.image {
            Some(_) if which::which(&self.config.container_runtime).is_ok() => {
                Ok(ExecutionMode::Container)
            }
            Some(_) => Err(self.unavailable(format!(
                "container runtime '{}' not found",
                self.config.container_runtime
            ))),
            None if self.config.command.is_none() => {
                Err(self.unavailable("no command or image configured"))
            }
            None => Err(self.unavailable(format!(
                "'{}' cannot run natively on {} and no image is configured",
                self.config.command.as_deref().unwrap_or_default(),
                std::env::consts::OS
            ))),
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> ParserError {
        ParserError::Unavailable {
            name: EXTERNAL_PARSER.to_string(),
            reason: reason.into(),
        }
    }

    fn command(&self, mode: ExecutionMode, root: &Path) -> Command {
        let root_str = root.to_string_lossy();
        match mode {
            ExecutionMode::Native => {
                let mut cmd = Command::new(self.config.command.as_deref().unwrap_or_default());
                cmd.args(self.config.args.iter().map(|a| a.replace("{root}", &root_str)));
                cmd
            }
            ExecutionMode::Container => {
                let mount = &self.config.mount_point;
                let mut cmd = Command::new(&self.config.container_runtime);
                cmd.arg("run")
                    .arg("--rm")
                    .arg("-v")
                    .arg(format!("{}:{}:ro", root_str, mount))
                    .arg(self.config.image.as_deref().unwrap_or_default());
                if let Some(command) = &self.config.command {
                    cmd.arg(command);
                }
                cmd.args(self.config.args.iter().map(|a| a.replace("{root}", mount)));
                cmd
            }
        }
    }

    /// Map a container path back onto the host root.
    fn host_path(&self, mode: ExecutionMode, root: &Path, path: &str) -> String {
        if mode != ExecutionMode::Container {
            return path.to_string();
        }
        let mount = self.config.mount_point.trim_end_matches('/');
        match path.strip_prefix(mount) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", root.to_string_lossy().trim_end_matches('/'), rest)
            }
            _ => path.to_string(),
        }
    }
}

#[async_trait]
impl CodeParser for ExternalToolParser {
    fn name(&self) -> &str {
        EXTERNAL_PARSER
    }

    fn description(&self) -> &str {
        "Configured external tool emitting JSON lines, run natively or in a container"
    }

    async fn ensure_available(&self) -> Result<(), ParserError> {
        self.execution_mode().map(|_| ())
    }

    async fn parse(&self, ctx: &ParseContext) -> Result<ParseReport, ParserError> {
        let mode = self.execution_mode()?;
        let scope = ctx.scope.as_str();
        let mut report = ParseReport::default();
        report.stats.parser = EXTERNAL_PARSER.to_string();
        report.stats.files_seen = ctx.files.len();

        tracing::info!(mode = ?mode, root = %ctx.root.display(), "running external parser");

        let mut child = self
            .command(mode, &ctx.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to start: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParserError::Tool("stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut ids: HashMap<String, String> = HashMap::new();
        let mut edges: Vec<(String, String, String)> = Vec::new();
        let mut files: HashSet<String> = HashSet::new();
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.timeout_secs));
        tokio::pin!(deadline);
        let mut line_no = 0usize;

        loop {
            let line = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ParserError::Cancelled),
                _ = &mut deadline => {
                    return Err(ParserError::Tool(format!(
                        "timed out after {}s",
                        self.config.timeout_secs
                    )));
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<ToolRecord>(trimmed) {
                Ok(ToolRecord::Node {
                    id,
                    kind,
                    name,
                    mut extra,
                }) => {
                    for key in schema::PATH_KEYS {
                        if let Some(Value::String(path)) = extra.get(key) {
                            let rewritten = self.host_path(mode, &ctx.root, path);
                            files.insert(rewritten.clone());
                            extra.insert(key.to_string(), Value::String(rewritten));
                        }
                    }
                    if let Some(lang) = extra.get("language").and_then(Value::as_str) {
                        *report.stats.by_language.entry(lang.to_string()).or_default() += 1;
                    }

                    let graph_id = node_id(scope, schema::AST_NODE, &format!("external:{}", id));
                    let mut draft = NodeDraft::new(scope, schema::AST_NODE).with_id(&graph_id);
                    if let Some(label) = schema::AST_KINDS
                        .iter()
                        .find(|k| k.eq_ignore_ascii_case(&kind))
                    {
                        draft = draft.with_label(*label);
                    }
                    draft.properties = extra;
                    let qualified = draft
                        .properties
                        .get("qualified_name")
                        .cloned()
                        .unwrap_or_else(|| Value::String(name.clone()));
                    let draft = draft
                        .property("kind", kind)
                        .property("name", name)
                        .property("qualified_name", qualified)
                        .property("external_id", id.clone())
                        .property("parser", EXTERNAL_PARSER)
                        .property(schema::MAPPING_STATUS, schema::STATUS_PENDING);

                    ctx.store.create_node(draft).await?;
                    report.stats.nodes_created += 1;
                    ids.insert(id, graph_id);
                }
                Ok(ToolRecord::Edge { from, to, rel }) => {
                    edges.push((from, to, rel.to_ascii_uppercase()));
                }
                Err(e) => {
                    report.errors.push(ItemError::new(
                        Stage::Parsing,
                        ItemErrorKind::Parse,
                        format!("{}:{}", EXTERNAL_PARSER, line_no),
                        format!("unreadable tool output: {}", e),
                    ));
                }
            }
        }

        let status = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ParserError::Cancelled),
            status = child.wait() => status?,
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(ParserError::Tool(format!(
                "exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        for (from, to, rel) in edges {
            let (Some(from_id), Some(to_id)) = (ids.get(&from), ids.get(&to)) else {
                tracing::debug!(from = %from, to = %to, "edge references unknown node");
                continue;
            };
            ctx.store
                .create_relationship(RelationshipDraft::new(from_id, &rel, to_id, scope))
                .await?;
            report.stats.relationships_created += 1;
            if rel == schema::CALLS {
                report.stats.calls_resolved += 1;
            }
        }

        report.stats.files_parsed = files.len();
        tracing::info!(
            nodes = report.stats.nodes_created,
            relationships = report.stats.relationships_created,
            bad_lines = report.errors.len(),
            "external parser finished"
        );
        Ok(report)
    }
}
