//! Filesystem abstraction.
//!
//! Pipeline stages read repository content only through [`FileSystem`], so
//! tests can swap in fixtures and the summarizer never touches `std::fs`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Read access to a materialized repository.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// All regular files below `root`, sorted.
    async fn list_files(&self, root: &Path) -> std::io::Result<Vec<PathBuf>>;

    /// File content as text; invalid UTF-8 is replaced.
    async fn read_file(&self, path: &Path) -> std::io::Result<String>;
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn list_files(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(&root)
                .standard_filters(false)
                .hidden(false)
                .build()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().map_or(false, |t| t.is_file()))
                .map(|entry| entry.into_path())
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(std::io::Error::other)
    }

    async fn read_file(&self, path: &Path) -> std::io::Result<String> {
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
