//! Collaborator capability interfaces
//!
//! The pipeline talks to the outside world only through these traits: text
//! generation, the file system, the test runner, version control, and the
//! code host. Each has one production implementation here and in-memory
//! substitutes in the integration tests. Implementations return `anyhow`
//! errors; pipeline components translate them into the [`crate::error`]
//! taxonomy at stage boundaries.

pub mod completion;
pub mod fs;
pub mod host;
pub mod runner;
pub mod vcs;

pub use completion::OpenRouterCompletion;
pub use fs::LocalFileStore;
pub use host::GithubHost;
pub use runner::ProcessTestRunner;
pub use vcs::GitWorkspace;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Single-shot text generation. No streaming, no session state.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// The only resource the pipeline mutates in place.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &Path) -> Result<String>;
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn delete(&self, path: &Path) -> Result<()>;
}

/// Outcome of compiling and executing one generated test in isolation.
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    pub passed: bool,
    pub output: String,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, test_source: &str) -> Result<TestRunOutcome>;
}

/// Local version-control operations plus the push to the remote.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn current_branch(&self) -> Result<String>;
    /// Check a branch out, creating it from the current HEAD if needed.
    async fn checkout_branch(&self, name: &str) -> Result<()>;
    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    async fn stage(&self, path: &Path) -> Result<()>;
    /// Commit staged changes, returning the commit id.
    async fn commit(&self, message: &str) -> Result<String>;
    async fn push(&self, branch: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<CreatedPullRequest>;
}
