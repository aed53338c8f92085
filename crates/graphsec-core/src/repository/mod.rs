//! Repository access: resolve a local path or clone a Git URI.
//!
//! A cloned repository lives in a [`TempDir`] owned by the returned
//! [`MaterializedRepository`]; dropping it removes the clone on every exit
//! path, including errors and cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::IngestError;

/// Where a repository comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositorySource {
    Local(PathBuf),
    Git { uri: String, branch: Option<String> },
}

impl RepositorySource {
    /// Build a source from the caller's optional inputs.
    ///
    /// Exactly one of `local_path` and `repo_uri` must be set, and a branch
    /// only makes sense with a URI.
    pub fn from_parts(
        local_path: Option<PathBuf>,
        repo_uri: Option<String>,
        branch: Option<String>,
    ) -> Result<Self, IngestError> {
        let repo_uri = repo_uri.filter(|u| !u.trim().is_empty());
        let branch = branch.filter(|b| !b.trim().is_empty());

        match (local_path, repo_uri) {
            (Some(_), Some(_)) => Err(IngestError::InvalidInput(
                "provide either a local path or a repository URI, not both".to_string(),
            )),
            (None, None) => Err(IngestError::InvalidInput(
                "a local path or a repository URI is required".to_string(),
            )),
            (Some(_), None) if branch.is_some() => Err(IngestError::InvalidInput(
                "a branch can only be given with a repository URI".to_string(),
            )),
            (Some(path), None) => Ok(RepositorySource::Local(path)),
            (None, Some(uri)) => Ok(RepositorySource::Git { uri, branch }),
        }
    }

    /// Human-readable origin, stored on the Repository node.
    pub fn display(&self) -> String {
        match self {
            RepositorySource::Local(path) => path.display().to_string(),
            RepositorySource::Git { uri, .. } => uri.clone(),
        }
    }
}

/// Commit metadata of the materialized checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub message: String,
    pub date: String,
}

/// A repository available on local disk.
#[derive(Debug)]
pub struct MaterializedRepository {
    pub root: PathBuf,
    pub source: RepositorySource,
    pub branch: Option<String>,
    pub commit: Option<CommitInfo>,
    _clone: Option<TempDir>,
}

impl MaterializedRepository {
    /// Whether the root is a temporary clone.
    pub fn is_clone(&self) -> bool {
        self._clone.is_some()
    }
}

/// Options for [`materialize`].
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Parent for temporary clones; system temp dir when `None`.
    pub clone_dir: Option<PathBuf>,
    pub clone_timeout: Duration,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            clone_dir: None,
            clone_timeout: Duration::from_secs(crate::config::DEFAULT_CLONE_TIMEOUT_SECS),
        }
    }
}

/// Make a repository available on local disk.
pub async fn materialize(
    source: RepositorySource,
    options: &MaterializeOptions,
) -> Result<MaterializedRepository, IngestError> {
    match &source {
        RepositorySource::Local(path) => {
            let root = tokio::fs::canonicalize(path).await.map_err(|e| {
                IngestError::Access(format!("{}: {}", path.display(), e))
            })?;
            let meta = tokio::fs::metadata(&root)
                .await
                .map_err(|e| IngestError::Access(format!("{}: {}", root.display(), e)))?;
            if !meta.is_dir() {
                return Err(IngestError::Access(format!(
                    "{} is not a directory",
                    root.display()
                )));
            }
            // Readability check only; the walk lists the tree later.
            let _entries = tokio::fs::read_dir(&root)
                .await
                .map_err(|e| IngestError::Access(format!("{}: {}", root.display(), e)))?;

            let commit = if root.join(".git").exists() {
                head_commit(&root).await
            } else {
                None
            };
            let branch = if commit.is_some() {
                current_branch(&root).await
            } else {
                None
            };

            Ok(MaterializedRepository {
                root,
                source,
                branch,
                commit,
                _clone: None,
            })
        }
        RepositorySource::Git { uri, branch } => {
            if which::which("git").is_err() {
                return Err(IngestError::Access(
                    "git executable not found on PATH".to_string(),
                ));
            }

            if let Some(branch) = branch {
                ensure_branch(uri, branch, options.clone_timeout).await?;
            }

            let temp = match &options.clone_dir {
                Some(parent) => {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| IngestError::Access(format!("{}: {}", parent.display(), e)))?;
                    tempfile::Builder::new().prefix("graphsec-clone-").tempdir_in(parent)
                }
                None => tempfile::Builder::new().prefix("graphsec-clone-").tempdir(),
            }
            .map_err(|e| IngestError::Access(format!("cannot create clone directory: {}", e)))?;

            let dest = temp.path().join("repo");
            clone(uri, branch.as_deref(), &dest, options.clone_timeout).await?;

            let commit = head_commit(&dest).await;
            let checked_out = match branch {
                Some(b) => Some(b.clone()),
                None => current_branch(&dest).await,
            };
            tracing::info!(
                uri = %uri,
                branch = ?checked_out,
                commit = ?commit.as_ref().map(|c| c.hash.as_str()),
                "repository cloned"
            );

            Ok(MaterializedRepository {
                root: dest,
                source,
                branch: checked_out,
                commit,
                _clone: Some(temp),
            })
        }
    }
}

async fn run_git(
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<std::process::Output, IngestError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|e| IngestError::Access(format!("failed to execute git: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            output.map_err(|e| IngestError::Access(format!("git {}: {}", args.join(" "), e)))
        }
        Err(_) => Err(IngestError::Access(format!(
            "git {} timed out after {}s",
            args.first().copied().unwrap_or_default(),
            timeout.as_secs()
        ))),
    }
}

async fn ensure_branch(uri: &str, branch: &str, timeout: Duration) -> Result<(), IngestError> {
    let output = run_git(&["ls-remote", "--heads", uri, branch], None, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::Access(format!("{}: {}", uri, stderr.trim())));
    }

    let wanted = format!("refs/heads/{}", branch);
    let found = String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(wanted.as_str()));
    if found {
        Ok(())
    } else {
        Err(IngestError::BranchNotFound {
            uri: uri.to_string(),
            branch: branch.to_string(),
        })
    }
}

async fn clone(
    uri: &str,
    branch: Option<&str>,
    dest: &Path,
    timeout: Duration,
) -> Result<(), IngestError> {
    let dest_str = dest.to_string_lossy().into_owned();
    let mut args = vec!["clone", "--depth", "1", "--single-branch"];
    if let Some(b) = branch {
        args.push("--branch");
        args.push(b);
    }
    args.push(uri);
    args.push(&dest_str);

    let output = run_git(&args, None, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::Access(format!(
            "git clone {} failed: {}",
            uri,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Metadata of HEAD, or `None` when `root` is not a Git work tree.
pub async fn head_commit(root: &Path) -> Option<CommitInfo> {
    let output = run_git(
        &["log", "-1", "--format=%H%x1f%an%x1f%s%x1f%cI"],
        Some(root),
        Duration::from_secs(30),
    )
    .await
    .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_commit_line(&String::from_utf8_lossy(&output.stdout))
}

async fn current_branch(root: &Path) -> Option<String> {
    let output = run_git(
        &["rev-parse", "--abbrev-ref", "HEAD"],
        Some(root),
        Duration::from_secs(30),
    )
    .await
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty() && name != "HEAD").then_some(name)
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.trim_end().split('\x1f');
    let hash = parts.next()?.trim().to_string();
    if hash.is_empty() {
        return None;
    }
    Some(CommitInfo {
        hash,
        author: parts.next().unwrap_or_default().to_string(),
        message: parts.next().unwrap_or_default().to_string(),
        date: parts.next().unwrap_or_default().to_string(),
    })
}
