//! Git operations for the fix-and-ship workflow
//!
//! Local operations go through libgit2; the push shells out to `git` so
//! the user's existing credential helpers keep working.

use super::VersionControl;
use crate::util::resolve_repo_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{Repository, Signature};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// [`VersionControl`] backed by the repository working tree.
pub struct GitWorkspace {
    repo_path: PathBuf,
    push_timeout: Duration,
}

impl GitWorkspace {
    pub fn new(repo_path: PathBuf, push_timeout: Duration) -> Self {
        Self {
            repo_path,
            push_timeout,
        }
    }
}

fn open(repo_path: &Path) -> Result<Repository> {
    Repository::open(repo_path)
        .with_context(|| format!("failed to open repository at {}", repo_path.display()))
}

fn checkout_branch_blocking(repo_path: &Path, name: &str) -> Result<()> {
    let repo = open(repo_path)?;

    // Create the branch from HEAD when it does not exist yet.
    if repo.find_branch(name, git2::BranchType::Local).is_err() {
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        repo.branch(name, &commit, false)
            .with_context(|| format!("failed to create branch '{}'", name))?;
    }

    let (object, reference) = repo
        .revparse_ext(name)
        .with_context(|| format!("branch '{}' not found", name))?;
    repo.checkout_tree(&object, None)?;
    match reference {
        Some(r) => repo.set_head(r.name().unwrap_or("HEAD"))?,
        None => repo.set_head_detached(object.id())?,
    }
    Ok(())
}

fn commit_blocking(repo_path: &Path, message: &str) -> Result<String> {
    let repo = open(repo_path)?;
    let mut index = repo.index()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let head = repo.head()?;
    let parent = head.peel_to_commit()?;

    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| "autonomic".to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| "autonomic@local".to_string());
    let sig = Signature::now(&name, &email)?;

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
    Ok(oid.to_string())
}

#[async_trait]
impl VersionControl for GitWorkspace {
    async fn current_branch(&self) -> Result<String> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let repo = open(&repo_path)?;
            let head = repo.head().context("failed to read HEAD")?;
            Ok(head.shorthand().unwrap_or("detached").to_string())
        })
        .await?
    }

    async fn checkout_branch(&self, name: &str) -> Result<()> {
        let repo_path = self.repo_path.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || checkout_branch_blocking(&repo_path, &name)).await?
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let full = resolve_repo_path(&self.repo_path, path).map_err(|e| anyhow::anyhow!(e))?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("failed to write {}", full.display()))
    }

    async fn stage(&self, path: &Path) -> Result<()> {
        let repo_path = self.repo_path.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let repo = open(&repo_path)?;
            let mut index = repo.index()?;
            index.add_path(&path)?;
            index.write()?;
            Ok(())
        })
        .await?
    }

    async fn commit(&self, message: &str) -> Result<String> {
        let repo_path = self.repo_path.clone();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || commit_blocking(&repo_path, &message)).await?
    }

    async fn push(&self, branch: &str) -> Result<()> {
        let child = tokio::process::Command::new("git")
            .current_dir(&self.repo_path)
            .args(["push", "-u", "origin", branch])
            .kill_on_drop(true)
            .output();

        let out = tokio::time::timeout(self.push_timeout, child)
            .await
            .map_err(|_| {
                anyhow::anyhow!("git push timed out after {}s", self.push_timeout.as_secs())
            })?
            .context("failed to execute git push")?;

        if out.status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "git push failed: {}",
                String::from_utf8_lossy(&out.stderr)
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "tester").unwrap();
            config.set_str("user.email", "tester@local").unwrap();

            std::fs::write(dir.join("README.md"), "# test\n").unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = Signature::now("tester", "tester@local").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_checkout_creates_missing_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let vcs = GitWorkspace::new(dir.path().to_path_buf(), Duration::from_secs(5));

        let before = vcs.current_branch().await.unwrap();
        vcs.checkout_branch("autonomic/fix-test").await.unwrap();
        assert_eq!(vcs.current_branch().await.unwrap(), "autonomic/fix-test");

        // And back again: the original branch still exists.
        vcs.checkout_branch(&before).await.unwrap();
        assert_eq!(vcs.current_branch().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_write_stage_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let vcs = GitWorkspace::new(dir.path().to_path_buf(), Duration::from_secs(5));

        vcs.write_file(Path::new("src/calc.ts"), "export const x = 1;\n")
            .await
            .unwrap();
        vcs.stage(Path::new("src/calc.ts")).await.unwrap();
        let sha = vcs.commit("TypeError: fix calc").await.unwrap();
        assert_eq!(sha.len(), 40);
    }
}
