//! Test execution against the live repository
//!
//! Writes a generated test to a scratch location inside the repo, invokes
//! the project's test command on it, and reports pass/fail plus combined
//! output. The scratch file is removed afterwards whatever the outcome.

use super::{TestRunner, TestRunOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Detected project type, which picks the test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

/// Detect project type from marker files in the repo root.
pub fn detect_project_type(repo_path: &Path) -> ProjectType {
    if repo_path.join("Cargo.toml").exists() {
        ProjectType::Rust
    } else if repo_path.join("package.json").exists() {
        ProjectType::Node
    } else if repo_path.join("pyproject.toml").exists()
        || repo_path.join("setup.py").exists()
        || repo_path.join("requirements.txt").exists()
    {
        ProjectType::Python
    } else if repo_path.join("go.mod").exists() {
        ProjectType::Go
    } else {
        ProjectType::Unknown
    }
}

/// [`TestRunner`] that shells out to the detected toolchain.
pub struct ProcessTestRunner {
    repo_path: PathBuf,
    timeout: Duration,
}

impl ProcessTestRunner {
    pub fn new(repo_path: PathBuf, timeout: Duration) -> Self {
        Self { repo_path, timeout }
    }

    /// Scratch file and command for one isolated test run.
    fn plan(&self, project: ProjectType) -> Option<(PathBuf, String, Vec<String>)> {
        let s = |v: &str| v.to_string();
        match project {
            ProjectType::Rust => Some((
                PathBuf::from("tests/repro_scratch.rs"),
                s("cargo"),
                vec![s("test"), s("--test"), s("repro_scratch")],
            )),
            ProjectType::Node => {
                let file = "repro.scratch.test.ts";
                let pkg_json = std::fs::read_to_string(self.repo_path.join("package.json"))
                    .unwrap_or_default();
                if pkg_json.contains("vitest") {
                    Some((
                        PathBuf::from(file),
                        s("npx"),
                        vec![s("vitest"), s("run"), s(file)],
                    ))
                } else if pkg_json.contains("jest") {
                    Some((PathBuf::from(file), s("npx"), vec![s("jest"), s(file)]))
                } else {
                    Some((PathBuf::from(file), s("npm"), vec![s("test")]))
                }
            }
            ProjectType::Python => {
                let file = "test_repro_scratch.py";
                Some((
                    PathBuf::from(file),
                    s("pytest"),
                    vec![s(file), s("-v")],
                ))
            }
            ProjectType::Go => Some((
                PathBuf::from("repro_scratch_test.go"),
                s("go"),
                vec![s("test"), s("-run"), s("."), s("./...")],
            )),
            ProjectType::Unknown => None,
        }
    }
}

#[async_trait]
impl TestRunner for ProcessTestRunner {
    async fn run(&self, test_source: &str) -> Result<TestRunOutcome> {
        let project = detect_project_type(&self.repo_path);
        let Some((scratch, cmd, args)) = self.plan(project) else {
            return Err(anyhow::anyhow!(
                "no test runner detected in {}",
                self.repo_path.display()
            ));
        };

        let scratch_abs = self.repo_path.join(&scratch);
        if let Some(parent) = scratch_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&scratch_abs, test_source)
            .await
            .with_context(|| format!("failed to write scratch test {}", scratch_abs.display()))?;

        debug!(command = %cmd, scratch = %scratch.display(), "running reproduction test");
        let outcome = run_with_timeout(&self.repo_path, &cmd, &args, self.timeout).await;

        // Scratch cleanup is best-effort; a leftover file only costs noise.
        let _ = tokio::fs::remove_file(&scratch_abs).await;

        outcome
    }
}

async fn run_with_timeout(
    cwd: &Path,
    cmd: &str,
    args: &[String],
    timeout: Duration,
) -> Result<TestRunOutcome> {
    let child = tokio::process::Command::new(cmd)
        .current_dir(cwd)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(out)) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&stderr);
            }
            Ok(TestRunOutcome {
                passed: out.status.success(),
                output: crate::util::truncate(&combined, 4000),
            })
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("failed to run {}: {}", cmd, e)),
        Err(_) => Err(anyhow::anyhow!(
            "test run exceeded {}s and was killed",
            timeout.as_secs()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_project_type_markers() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Unknown);

        std::fs::write(dir.path().join("go.mod"), "module example").unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Go);

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Node);

        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Rust);
    }

    #[test]
    fn test_node_plan_prefers_vitest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies": {"vitest": "^1.0.0"}}"#,
        )
        .unwrap();
        let runner = ProcessTestRunner::new(dir.path().to_path_buf(), Duration::from_secs(5));
        let (_, cmd, args) = runner.plan(ProjectType::Node).unwrap();
        assert_eq!(cmd, "npx");
        assert_eq!(args[0], "vitest");
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessTestRunner::new(dir.path().to_path_buf(), Duration::from_secs(5));
        assert!(runner.run("assert true").await.is_err());
    }

    #[tokio::test]
    async fn test_scratch_file_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        // A python project with a test body; pytest is likely missing in the
        // environment, which surfaces as a spawn error. Either way the
        // scratch file must be gone afterwards.
        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        let runner = ProcessTestRunner::new(dir.path().to_path_buf(), Duration::from_secs(5));
        let _ = runner.run("def test_x():\n    assert True\n").await;
        assert!(!dir.path().join("test_repro_scratch.py").exists());
    }
}
