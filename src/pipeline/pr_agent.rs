//! Pull-request packaging for verified patches
//!
//! Branch, commit, push, open PR. If anything fails after the fix branch
//! was checked out, the previously checked-out branch is restored so the
//! working tree is never left parked on a half-shipped branch.

use super::{PatchResult, PullRequestResult, ReproductionTest};
use crate::error::RemedyError;
use crate::listener::ErrorRecord;
use crate::services::{CodeHost, NewPullRequest, VersionControl};
use crate::util::truncate;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PrAgent {
    vcs: Arc<dyn VersionControl>,
    host: Arc<dyn CodeHost>,
    base_branch: String,
}

impl PrAgent {
    pub fn new(vcs: Arc<dyn VersionControl>, host: Arc<dyn CodeHost>, base_branch: String) -> Self {
        Self {
            vcs,
            host,
            base_branch,
        }
    }

    /// Package a verified patch into a branch, commit, push, and PR.
    pub async fn submit_fix(
        &self,
        record: &ErrorRecord,
        fix: &PatchResult,
        test: &ReproductionTest,
    ) -> Result<PullRequestResult, RemedyError> {
        let branch = fix_branch_name(record.id);
        let prior_branch = self
            .vcs
            .current_branch()
            .await
            .map_err(|e| RemedyError::SubmissionFailed(e.to_string()))?;

        match self.ship(record, fix, test, &branch).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Leave the tree on the branch we started from.
                if let Err(restore_err) = self.vcs.checkout_branch(&prior_branch).await {
                    warn!(
                        branch = %prior_branch,
                        error = %restore_err,
                        "failed to restore prior branch after submission failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn ship(
        &self,
        record: &ErrorRecord,
        fix: &PatchResult,
        test: &ReproductionTest,
        branch: &str,
    ) -> Result<PullRequestResult, RemedyError> {
        let submission = |e: anyhow::Error| RemedyError::SubmissionFailed(e.to_string());

        self.vcs.checkout_branch(branch).await.map_err(submission)?;

        for change in &fix.file_changes {
            self.vcs
                .write_file(&change.file, &change.modified_content)
                .await
                .map_err(submission)?;
            self.vcs.stage(&change.file).await.map_err(submission)?;
        }

        let message = commit_message(record, fix);
        self.vcs.commit(&message).await.map_err(submission)?;
        self.vcs.push(branch).await.map_err(submission)?;

        let request = NewPullRequest {
            title: pr_title(record),
            body: pr_body(record, fix, test),
            head: branch.to_string(),
            base: self.base_branch.clone(),
            labels: vec!["autonomic".to_string()],
        };
        let created = self
            .host
            .create_pull_request(&request)
            .await
            .map_err(submission)?;

        info!(
            id = %record.id,
            pr = created.number,
            url = %created.url,
            "pull request opened"
        );

        Ok(PullRequestResult {
            number: created.number,
            url: created.url,
            branch_name: branch.to_string(),
        })
    }
}

/// Deterministic branch name for an error, so a re-run targets the same
/// branch instead of littering the remote.
pub fn fix_branch_name(error_id: Uuid) -> String {
    format!("autonomic/fix-{}", error_id)
}

fn commit_message(record: &ErrorRecord, fix: &PatchResult) -> String {
    format!(
        "fix({}): {}\n\nAutomated remediation for: {}",
        record.error_kind,
        truncate(&fix.description, 72),
        truncate(&record.message, 200)
    )
}

fn pr_title(record: &ErrorRecord) -> String {
    format!(
        "Automated fix: {}: {}",
        record.error_kind,
        truncate(&record.message, 80)
    )
}

fn pr_body(record: &ErrorRecord, fix: &PatchResult, test: &ReproductionTest) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "## Error\n\n**{}** (severity: {}, seen {} times)\n\n```\n{}\n```\n",
        record.error_kind,
        record.severity.label(),
        record.seen_count,
        record.message
    ));

    if !record.stack_trace.is_empty() {
        body.push_str("\n## Stack trace\n\n```\n");
        for frame in &record.stack_trace {
            body.push_str(&format!(
                "at {} ({}:{}:{})\n",
                frame.function.as_deref().unwrap_or("<anonymous>"),
                frame.file,
                frame.line,
                frame.column
            ));
        }
        body.push_str("```\n");
    }

    body.push_str(&format!("\n## Fix\n\n{}\n", fix.description));
    for change in &fix.file_changes {
        if !change.diff.is_empty() {
            body.push_str(&format!("\n```diff\n{}```\n", change.diff));
        }
    }

    body.push_str(&format!(
        "\n## Verification\n\nReproduction test at `{}` fails before this change and passes after it.\n",
        test.test_file.display()
    ));

    body
}
