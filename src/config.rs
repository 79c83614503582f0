//! Configuration for the remediation pipeline
//!
//! Stored as JSON under the user config directory. Secrets never land in
//! the file; the completion API key and the GitHub token come from the
//! environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository the pipeline operates on.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    /// How often the orchestrator polls for new auto-fixable errors.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on concurrently running jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// When false, detection alone never starts a job; someone must call
    /// `process_error` explicitly.
    #[serde(default = "default_auto_process")]
    pub auto_process: bool,
    /// Fallback target when an error carries no usable stack trace.
    #[serde(default = "default_target_file")]
    pub default_target_file: PathBuf,
    /// Base branch pull requests are opened against.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Completion model identifier passed to the provider.
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Give up on an error after this many failed jobs.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry backoff; doubles per failed attempt.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_push_timeout_secs")]
    pub push_timeout_secs: u64,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_max_concurrent_jobs() -> usize {
    3
}
fn default_auto_process() -> bool {
    true
}
fn default_target_file() -> PathBuf {
    PathBuf::from("src/main.rs")
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_completion_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_secs() -> u64 {
    30
}
fn default_completion_timeout_secs() -> u64 {
    120
}
fn default_test_timeout_secs() -> u64 {
    300
}
fn default_push_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autonomic").join("config.json"))
    }

    /// Load from disk, or return defaults. A corrupted file is reported
    /// and replaced with defaults rather than aborting startup.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "config file corrupted, using defaults"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save to disk, creating the config directory if needed.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Completion provider API key, environment only.
    pub fn api_key(&self) -> Option<String> {
        std::env::var("AUTONOMIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
    }
}
