//! Remediation pipeline stages
//!
//! Three stages, each producing one typed artifact: a reproduction test,
//! a verified patch, and a pull request. The orchestrator drives them
//! strictly in that order for every job.

pub mod diff;
pub mod parse;
pub mod patch_agent;
pub mod pr_agent;
pub mod prompts;
pub mod test_writer;

pub use patch_agent::PatchAgent;
pub use pr_agent::PrAgent;
pub use test_writer::TestWriter;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A test engineered to fail the same way as the observed fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionTest {
    pub test_code: String,
    /// Existing test file found by naming convention, or a generated
    /// sibling name when none exists.
    pub test_file: PathBuf,
    /// True only if executing the test against the unpatched tree failed
    /// in the originally observed way.
    pub reproduces_error: bool,
}

/// One file touched by a patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub file: PathBuf,
    pub original_content: String,
    pub modified_content: String,
    pub diff: String,
}

/// A verified patch. Never constructed with `test_passes = false`: if
/// verification fails, the changes are reverted and an error is raised
/// instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchResult {
    pub file_changes: Vec<FileChange>,
    pub description: String,
    pub test_passes: bool,
}

/// Terminal artifact of a successful job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestResult {
    pub number: u64,
    pub url: String,
    pub branch_name: String,
}
