//! Patch synthesis and safety verification
//!
//! The one correctness-critical module in the pipeline. A patch is only
//! ever returned after the reproduction test passes against the patched
//! tree; on any other outcome every touched file is restored to its
//! pre-call content before the error propagates.

use super::{diff, parse, prompts, FileChange, PatchResult, ReproductionTest};
use crate::error::RemedyError;
use crate::listener::ErrorRecord;
use crate::services::{CompletionService, FileStore, TestRunner};
use crate::util::truncate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_SOURCE_CHARS: usize = 20_000;

/// Snapshot of one file taken before its change was applied.
/// `original: None` means the file did not exist.
struct AppliedChange {
    path: PathBuf,
    original: Option<String>,
    modified: String,
}

pub struct PatchAgent {
    completion: Arc<dyn CompletionService>,
    files: Arc<dyn FileStore>,
    runner: Arc<dyn TestRunner>,
}

impl PatchAgent {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        files: Arc<dyn FileStore>,
        runner: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            completion,
            files,
            runner,
        }
    }

    /// Generate, apply, and verify a patch for `record`.
    ///
    /// On success the returned [`PatchResult`] always has
    /// `test_passes = true` and the changes are live on disk. On failure
    /// the tree is back to its pre-call state.
    pub async fn generate_fix(
        &self,
        record: &ErrorRecord,
        test: &ReproductionTest,
        target_file: &Path,
    ) -> Result<PatchResult, RemedyError> {
        let source = self.files.read(target_file).await.map_err(|e| {
            RemedyError::SourceUnavailable {
                path: target_file.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let prompt = build_prompt(record, target_file, &source, &test.test_code);
        let response = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|e| RemedyError::GenerationFailed(e.to_string()))?;

        let mut changes = parse::parse_file_changes(&response);
        if changes.is_empty() {
            // No structured blocks: treat the whole body as the new
            // content of the target file.
            let body = parse::strip_code_fences(&response);
            if body.trim().is_empty() {
                return Err(RemedyError::NoPatchProduced);
            }
            changes.push((target_file.to_path_buf(), body.to_string()));
        }

        let description = parse::extract_rationale(&response)
            .unwrap_or_else(|| format!("automated fix for {}", record.error_kind));

        // Apply with snapshots, then verify. Any slip from here on reverts.
        let mut applied: Vec<AppliedChange> = Vec::new();
        for (path, modified) in changes {
            let original = if self.files.exists(&path).await {
                match self.files.read(&path).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        self.revert(&applied).await;
                        return Err(RemedyError::VerificationFailed {
                            test_output: format!("failed to snapshot {}: {}", path.display(), e),
                        });
                    }
                }
            } else {
                None
            };

            if let Err(e) = self.files.write(&path, &modified).await {
                self.revert(&applied).await;
                return Err(RemedyError::VerificationFailed {
                    test_output: format!("failed to apply change to {}: {}", path.display(), e),
                });
            }

            applied.push(AppliedChange {
                path,
                original,
                modified,
            });
        }

        let outcome = match self.runner.run(&test.test_code).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.revert(&applied).await;
                return Err(RemedyError::VerificationFailed {
                    test_output: format!("test execution failed: {}", e),
                });
            }
        };

        if !outcome.passed {
            self.revert(&applied).await;
            warn!(id = %record.id, "patch failed verification, reverted");
            return Err(RemedyError::VerificationFailed {
                test_output: truncate(&outcome.output, 4000),
            });
        }

        info!(
            id = %record.id,
            files = applied.len(),
            "patch verified against reproduction test"
        );

        let file_changes = applied
            .into_iter()
            .map(|change| {
                let original = change.original.unwrap_or_default();
                let rendered = diff::unified_diff(&change.path, &original, &change.modified);
                FileChange {
                    file: change.path,
                    original_content: original,
                    modified_content: change.modified,
                    diff: rendered,
                }
            })
            .collect();

        Ok(PatchResult {
            file_changes,
            description,
            test_passes: true,
        })
    }

    /// Restore snapshots in reverse application order. Best-effort: a file
    /// that fails to restore is logged and skipped, never aborts the rest.
    async fn revert(&self, applied: &[AppliedChange]) {
        for change in applied.iter().rev() {
            let result = match &change.original {
                Some(content) => self.files.write(&change.path, content).await,
                None => self.files.delete(&change.path).await,
            };
            if let Err(e) = result {
                warn!(
                    path = %change.path.display(),
                    error = %e,
                    "failed to revert file after rejected patch"
                );
            }
        }
    }
}

fn build_prompt(
    record: &ErrorRecord,
    target_file: &Path,
    source: &str,
    test_code: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(prompts::PATCH_PROMPT);
    prompt.push_str(&format!(
        "\nERROR:\nkind: {}\nmessage: {}\n",
        record.error_kind, record.message
    ));
    prompt.push_str(&format!(
        "\nCURRENT SOURCE ({}):\n{}\n",
        target_file.display(),
        truncate(source, MAX_SOURCE_CHARS)
    ));
    prompt.push_str(&format!("\nREPRODUCTION TEST:\n{}\n", test_code));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_test_and_source() {
        use crate::listener::Severity;
        let record = ErrorRecord {
            id: uuid::Uuid::new_v4(),
            source: "svc".to_string(),
            error_kind: "TypeError".to_string(),
            message: "boom".to_string(),
            stack_trace: Vec::new(),
            context: None,
            severity: Severity::Medium,
            reproducible: true,
            first_seen: chrono::Utc::now(),
            seen_count: 1,
            resolution: None,
        };
        let prompt = build_prompt(
            &record,
            Path::new("src/calc.ts"),
            "const a = 1;",
            "it('fails', () => {});",
        );
        assert!(prompt.contains("CURRENT SOURCE (src/calc.ts)"));
        assert!(prompt.contains("REPRODUCTION TEST"));
        assert!(prompt.contains("it('fails', () => {});"));
    }
}
