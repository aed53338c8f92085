//! Filesystem graph builder.
//!
//! Walks the materialized tree and writes a Repository node, one Directory
//! node per directory and one File node per file, linked by `CONTAINS`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, IngestionConfig};
use crate::error::IngestError;
use crate::graph::{node_id, schema, GraphStore, NodeDraft, RelationshipDraft};
use crate::parser::{language_for_path, SourceFile};
use crate::repository::MaterializedRepository;

/// Relative path of the root directory node.
pub const ROOT_DIR: &str = ".";

/// What the builder wrote.
#[derive(Debug, Clone, Default)]
pub struct FilesystemGraph {
    pub repository_id: String,
    pub root_directory_id: String,
    pub files: Vec<SourceFile>,
    pub directories: usize,
    pub total_bytes: u64,
}

/// Id of the Repository node of an ingestion.
pub fn repository_node_id(scope: &str) -> String {
    format!("repository-{}", scope)
}

struct WalkEntry {
    rel_path: String,
    abs_path: PathBuf,
    is_dir: bool,
    size: u64,
    hash: Option<String>,
}

/// Include/exclude filter over root-relative paths.
struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    fn new(config: &IngestionConfig) -> Result<Self, ConfigError> {
        let include = if config.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_globs)?)
        };
        Ok(Self {
            include,
            exclude: build_globset(&config.exclude_globs)?,
        })
    }

    fn accepts(&self, rel_path: &str) -> bool {
        if self.exclude.is_match(rel_path) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(rel_path))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ConfigError::Invalid(format!("glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Write the Repository node for a materialized checkout.
pub async fn create_repository_node(
    store: &Arc<dyn GraphStore>,
    repo: &MaterializedRepository,
    scope: &str,
) -> Result<String, IngestError> {
    let id = repository_node_id(scope);
    let commit = repo.commit.as_ref();
    let name = repo
        .root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| repo.source.display());

    store
        .create_node(
            NodeDraft::new(scope, schema::REPOSITORY)
                .with_id(&id)
                .property("name", name)
                .property("source", repo.source.display())
                .property("root", repo.root.to_string_lossy().into_owned())
                .property("ingestion_id", scope)
                .property("state", "building_filesystem")
                .optional_property("branch", repo.branch.clone())
                .optional_property("commit_hash", commit.map(|c| c.hash.clone()))
                .optional_property("commit_author", commit.map(|c| c.author.clone()))
                .optional_property("commit_message", commit.map(|c| c.message.clone()))
                .optional_property("commit_date", commit.map(|c| c.date.clone())),
        )
        .await?;
    Ok(id)
}

/// Walk the tree and write Directory/File nodes under the Repository node.
pub async fn build_filesystem_graph(
    store: &Arc<dyn GraphStore>,
    repo: &MaterializedRepository,
    scope: &str,
    config: &IngestionConfig,
    cancel: &CancellationToken,
) -> Result<FilesystemGraph, IngestError> {
    let repository_id = create_repository_node(store, repo, scope).await?;

    let filter = PathFilter::new(config)?;
    let root = repo.root.clone();
    let walk_config = config.clone();
    let entries = tokio::task::spawn_blocking(move || walk(&root, &walk_config, &filter))
        .await
        .map_err(|e| IngestError::Access(format!("filesystem walk aborted: {}", e)))?;

    let root_directory_id = node_id(scope, schema::DIRECTORY, ROOT_DIR);
    store
        .create_node(
            NodeDraft::new(scope, schema::DIRECTORY)
                .with_id(&root_directory_id)
                .property("path", ROOT_DIR)
                .property("name", ROOT_DIR)
                .property("full_path", repo.root.to_string_lossy().into_owned()),
        )
        .await?;
    store
        .create_relationship(RelationshipDraft::new(
            &repository_id,
            schema::CONTAINS,
            &root_directory_id,
            scope,
        ))
        .await?;

    let mut graph = FilesystemGraph {
        repository_id,
        root_directory_id,
        directories: 1,
        ..Default::default()
    };

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let parent_id = node_id(scope, schema::DIRECTORY, parent_of(&entry.rel_path));
        let name = entry
            .rel_path
            .rsplit('/')
            .next()
            .unwrap_or(&entry.rel_path)
            .to_string();
        let full_path = entry.abs_path.to_string_lossy().into_owned();

        if entry.is_dir {
            let id = node_id(scope, schema::DIRECTORY, &entry.rel_path);
            store
                .create_node(
                    NodeDraft::new(scope, schema::DIRECTORY)
                        .with_id(&id)
                        .property("path", entry.rel_path.clone())
                        .property("name", name)
                        .property("full_path", full_path),
                )
                .await?;
            store
                .create_relationship(RelationshipDraft::new(&parent_id, schema::CONTAINS, &id, scope))
                .await?;
            graph.directories += 1;
            continue;
        }

        let id = node_id(scope, schema::FILE, &entry.rel_path);
        let language = language_for_path(&entry.rel_path).map(|l| l.name.to_string());
        let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        let oversized = entry.size > config.max_file_size;

        store
            .create_node(
                NodeDraft::new(scope, schema::FILE)
                    .with_id(&id)
                    .property("path", entry.rel_path.clone())
                    .property("name", name)
                    .property("full_path", full_path)
                    .property("size", entry.size)
                    .property("oversized", oversized)
                    .optional_property("extension", extension)
                    .optional_property("language", language.clone())
                    .optional_property("hash", entry.hash),
            )
            .await?;
        store
            .create_relationship(RelationshipDraft::new(&parent_id, schema::CONTAINS, &id, scope))
            .await?;

        graph.total_bytes += entry.size;
        graph.files.push(SourceFile {
            id,
            rel_path: entry.rel_path,
            abs_path: entry.abs_path,
            language,
            size: entry.size,
            oversized,
        });
    }

    tracing::info!(
        files = graph.files.len(),
        directories = graph.directories,
        bytes = graph.total_bytes,
        "filesystem graph built"
    );
    Ok(graph)
}

/// Parent directory key of a relative path.
fn parent_of(rel_path: &str) -> &str {
    match rel_path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent,
        _ => ROOT_DIR,
    }
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Directories come before their children; siblings sorted by name.
/// Directories with no accepted file below them are dropped.
fn walk(root: &Path, config: &IngestionConfig, filter: &PathFilter) -> Vec<WalkEntry> {
    let excluded: Vec<String> = config.exclude_dirs.clone();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .git_global(false)
        .ignore(config.respect_gitignore)
        .parents(false)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map_or(false, |t| t.is_dir());
            !(is_dir && entry.depth() > 0 && excluded.iter().any(|d| entry.file_name() == d.as_str()))
        })
        .build();

    let mut entries = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let Some(rel_path) = relative(root, entry.path()) else {
            continue;
        };
        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            entries.push(WalkEntry {
                rel_path,
                abs_path: entry.path().to_path_buf(),
                is_dir: true,
                size: 0,
                hash: None,
            });
            continue;
        }
        if !file_type.is_file() || !filter.accepts(&rel_path) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let hash = if size <= config.max_file_size {
            std::fs::read(entry.path()).ok().map(|bytes| {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                hex::encode(hasher.finalize())
            })
        } else {
            None
        };

        entries.push(WalkEntry {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            is_dir: false,
            size,
            hash,
        });
    }
    prune_empty_directories(entries)
}

fn prune_empty_directories(entries: Vec<WalkEntry>) -> Vec<WalkEntry> {
    let mut occupied = HashSet::new();
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let mut path = entry.rel_path.as_str();
        while let Some((parent, _)) = path.rsplit_once('/') {
            // Ancestors of a known directory are already in.
            if !occupied.insert(parent.to_string()) {
                break;
            }
            path = parent;
        }
    }
    entries
        .into_iter()
        .filter(|e| !e.is_dir || occupied.contains(&e.rel_path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraphStore, NodeFilter, RelationshipFilter};
    use crate::repository::{materialize, MaterializeOptions, RepositorySource};
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/app")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/app/main.py"), "def f():\n    pass\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# Demo\n").unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "lock").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        dir
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("a.py"), ".");
        assert_eq!(parent_of("src/app/main.py"), "src/app");
    }

    #[tokio::test]
    async fn test_build_filesystem_graph() {
        let dir = fixture();
        let repo = materialize(
            RepositorySource::Local(dir.path().to_path_buf()),
            &MaterializeOptions::default(),
        )
        .await
        .unwrap();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());

        let graph = build_filesystem_graph(
            &store,
            &repo,
            "run-1",
            &IngestionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let paths: Vec<&str> = graph.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/app/main.py"]);
        assert_eq!(graph.directories, 3);

        let main = &graph.files[1];
        assert_eq!(main.language.as_deref(), Some("python"));
        let node = store.get_node(&main.id).await.unwrap().unwrap();
        assert_eq!(node.prop_str("extension"), Some("py"));
        assert_eq!(node.prop_str("hash").map(|h| h.len()), Some(64));

        let app_dir = node_id("run-1", schema::DIRECTORY, "src/app");
        let contains = store
            .find_relationships(
                &RelationshipFilter::of_type(schema::CONTAINS)
                    .from_node(&app_dir)
                    .to_node(&main.id),
            )
            .await
            .unwrap();
        assert_eq!(contains.len(), 1);

        let repos = store
            .find_nodes(&NodeFilter::label(schema::REPOSITORY))
            .await
            .unwrap();
        assert_eq!(repos.len(), 1);
    }

    #[tokio::test]
    async fn test_include_globs_and_oversized() {
        let dir = fixture();
        std::fs::write(dir.path().join("src/big.py"), "x".repeat(64)).unwrap();
        let repo = materialize(
            RepositorySource::Local(dir.path().to_path_buf()),
            &MaterializeOptions::default(),
        )
        .await
        .unwrap();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let config = IngestionConfig {
            include_globs: vec!["**/*.py".to_string()],
            max_file_size: 32,
            ..Default::default()
        };

        let graph = build_filesystem_graph(&store, &repo, "run-2", &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(graph.files.len(), 2);
        let big = graph.files.iter().find(|f| f.rel_path == "src/big.py").unwrap();
        assert!(big.oversized);
    }

    #[tokio::test]
    async fn test_directories_without_accepted_files_are_skipped() {
        let dir = fixture();
        std::fs::create_dir_all(dir.path().join("docs/empty")).unwrap();
        std::fs::create_dir_all(dir.path().join("locks")).unwrap();
        std::fs::write(dir.path().join("locks/Cargo.lock"), "lock").unwrap();
        let repo = materialize(
            RepositorySource::Local(dir.path().to_path_buf()),
            &MaterializeOptions::default(),
        )
        .await
        .unwrap();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());

        let graph = build_filesystem_graph(
            &store,
            &repo,
            "run-4",
            &IngestionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(graph.directories, 3);
        let mut paths: Vec<String> = store
            .find_nodes(&NodeFilter::label(schema::DIRECTORY).in_scope("run-4"))
            .await
            .unwrap()
            .iter()
            .filter_map(|n| n.prop_str("path").map(String::from))
            .collect();
        paths.sort();
        assert_eq!(paths, vec![".", "src", "src/app"]);
    }

    #[tokio::test]
    async fn test_cancelled_build() {
        let dir = fixture();
        let repo = materialize(
            RepositorySource::Local(dir.path().to_path_buf()),
            &MaterializeOptions::default(),
        )
        .await
        .unwrap();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            build_filesystem_graph(&store, &repo, "run-3", &IngestionConfig::default(), &cancel).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
    }
}
