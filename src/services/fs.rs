//! Local-disk file store rooted at the repository

use super::FileStore;
use crate::util::resolve_repo_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// [`FileStore`] backed by the real file system. Paths are repo-relative
/// and confined to the root; traversal attempts are rejected outright.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_repo_path(&self.root, path).map_err(|e| anyhow::anyhow!(e))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &Path) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("failed to read {}", full.display()))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("failed to write {}", full.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(&full).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .with_context(|| format!("failed to delete {}", full.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        let path = Path::new("src/lib.rs");

        store.write(path, "pub fn f() {}").await.unwrap();
        assert!(store.exists(path).await);
        assert_eq!(store.read(path).await.unwrap(), "pub fn f() {}");

        store.delete(path).await.unwrap();
        assert!(!store.exists(path).await);
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        assert!(store.read(Path::new("missing.rs")).await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        assert!(store.write(Path::new("../escape.txt"), "nope").await.is_err());
        assert!(!store.exists(Path::new("../escape.txt")).await);
    }
}
