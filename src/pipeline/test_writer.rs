//! Reproduction-test synthesis
//!
//! Turns an error record into a test that fails the same way the
//! production fault did. A test that passes against the unpatched source
//! proves nothing and is rejected; one corrective retry is allowed.

use super::{parse, prompts, ReproductionTest};
use crate::error::RemedyError;
use crate::listener::ErrorRecord;
use crate::services::{CompletionService, FileStore, TestRunner, TestRunOutcome};
use crate::util::truncate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_SOURCE_CHARS: usize = 20_000;
const MAX_STYLE_CHARS: usize = 6_000;

pub struct TestWriter {
    completion: Arc<dyn CompletionService>,
    files: Arc<dyn FileStore>,
    runner: Arc<dyn TestRunner>,
}

impl TestWriter {
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

    /// Generate and validate a reproduction test for `record`.
    ///
    /// The returned artifact carries `reproduces_error = false` when the
    /// corrective retry still failed to reproduce; the orchestrator treats
    /// that as a stage failure.
    pub async fn generate(
        &self,
        record: &ErrorRecord,
        target_file: &Path,
    ) -> Result<ReproductionTest, RemedyError> {
        let source = self.files.read(target_file).await.map_err(|e| {
            RemedyError::SourceUnavailable {
                path: target_file.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let (test_file, style_context) = self.locate_test_context(target_file).await;

        let prompt = build_prompt(record, target_file, &source, style_context.as_deref(), None);
        let response = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|e| RemedyError::GenerationFailed(e.to_string()))?;
        let test_code = parse::strip_code_fences(&response).to_string();

        let outcome = self.execute(&test_code).await?;
        if reproduces_failure(&outcome, record) {
            info!(id = %record.id, "reproduction test confirmed on first attempt");
            return Ok(ReproductionTest {
                test_code,
                test_file,
                reproduces_error: true,
            });
        }

        // One corrective retry with the run output appended, then accept
        // whatever verdict the second attempt earns.
        debug!(id = %record.id, "first test attempt did not reproduce, retrying");
        let retry_prompt = build_prompt(
            record,
            target_file,
            &source,
            style_context.as_deref(),
            Some(&outcome.output),
        );
        let response = self
            .completion
            .complete(&retry_prompt)
            .await
            .map_err(|e| RemedyError::GenerationFailed(e.to_string()))?;
        let test_code = parse::strip_code_fences(&response).to_string();

        let outcome = self.execute(&test_code).await?;
        let reproduces = reproduces_failure(&outcome, record);
        if !reproduces {
            debug!(id = %record.id, "retry attempt also failed to reproduce");
        }

        Ok(ReproductionTest {
            test_code,
            test_file,
            reproduces_error: reproduces,
        })
    }

    async fn execute(&self, test_code: &str) -> Result<TestRunOutcome, RemedyError> {
        self.runner
            .run(test_code)
            .await
            .map_err(|e| RemedyError::GenerationFailed(format!("test execution failed: {}", e)))
    }

    /// Find an existing test file for the target by naming convention and
    /// read it for style context. Falls back to a generated sibling name.
    async fn locate_test_context(&self, target_file: &Path) -> (PathBuf, Option<String>) {
        let generated = sibling_test_path(target_file);

        for candidate in test_file_candidates(target_file) {
            if self.files.exists(&candidate).await {
                let style = self
                    .files
                    .read(&candidate)
                    .await
                    .ok()
                    .map(|s| truncate(&s, MAX_STYLE_CHARS));
                return (candidate, style);
            }
        }

        (generated, None)
    }
}

/// Conventional test locations for a source file, most specific first.
fn test_file_candidates(target_file: &Path) -> Vec<PathBuf> {
    let Some(stem) = target_file.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let ext = target_file
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let parent = target_file.parent().unwrap_or_else(|| Path::new(""));

    let mut names = vec![
        format!("{}.test.{}", stem, ext),
        format!("{}.spec.{}", stem, ext),
    ];
    if ext == "py" {
        names.push(format!("test_{}.py", stem));
    }

    let mut candidates = Vec::new();
    for name in &names {
        candidates.push(parent.join(name));
    }
    for name in &names {
        candidates.push(parent.join("tests").join(name));
        candidates.push(parent.join("__tests__").join(name));
    }
    candidates
}

/// Generated sibling name used when no existing test file is found.
fn sibling_test_path(target_file: &Path) -> PathBuf {
    let stem = target_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("repro");
    let ext = target_file
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("txt");
    let parent = target_file.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{}.test.{}", stem, ext))
}

/// A run reproduces the fault when it fails and its output carries the
/// original error signature. A passing run never counts.
fn reproduces_failure(outcome: &TestRunOutcome, record: &ErrorRecord) -> bool {
    if outcome.passed {
        return false;
    }
    let haystack = outcome.output.to_lowercase();
    if haystack.contains(&record.error_kind.to_lowercase()) {
        return true;
    }
    message_snippet(&record.message)
        .map(|snippet| haystack.contains(&snippet))
        .unwrap_or(false)
}

/// A lowercased prefix of the message, long enough to be distinctive.
fn message_snippet(message: &str) -> Option<String> {
    let trimmed = message.trim();
    if trimmed.len() < 8 {
        return None;
    }
    Some(truncate(trimmed, 40).trim_end_matches("...").to_lowercase())
}

fn build_prompt(
    record: &ErrorRecord,
    target_file: &Path,
    source: &str,
    style_context: Option<&str>,
    previous_output: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(prompts::REPRO_TEST_PROMPT);
    if previous_output.is_some() {
        prompt.push_str(prompts::REPRO_RETRY_NOTE);
    }

    prompt.push_str(&format!(
        "\nERROR:\nkind: {}\nmessage: {}\n",
        record.error_kind, record.message
    ));
    if !record.stack_trace.is_empty() {
        prompt.push_str("trace:\n");
        for frame in &record.stack_trace {
            prompt.push_str(&format!(
                "  at {} ({}:{}:{})\n",
                frame.function.as_deref().unwrap_or("<anonymous>"),
                frame.file,
                frame.line,
                frame.column
            ));
        }
    }

    prompt.push_str(&format!(
        "\nSOURCE ({}):\n{}\n",
        target_file.display(),
        truncate(source, MAX_SOURCE_CHARS)
    ));

    if let Some(style) = style_context {
        prompt.push_str(&format!("\nEXISTING TESTS (match this style):\n{}\n", style));
    }

    if let Some(output) = previous_output {
        prompt.push_str(&format!(
            "\nPREVIOUS ATTEMPT OUTPUT:\n{}\n",
            truncate(output, 2000)
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Severity;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(kind: &str, message: &str) -> ErrorRecord {
        ErrorRecord {
            id: Uuid::new_v4(),
            source: "svc".to_string(),
            error_kind: kind.to_string(),
            message: message.to_string(),
            stack_trace: Vec::new(),
            context: None,
            severity: Severity::Medium,
            reproducible: true,
            first_seen: Utc::now(),
            seen_count: 1,
            resolution: None,
        }
    }

    #[test]
    fn test_passing_run_never_reproduces() {
        let outcome = TestRunOutcome {
            passed: true,
            output: "TypeError: boom".to_string(),
        };
        assert!(!reproduces_failure(&outcome, &record("TypeError", "boom")));
    }

    #[test]
    fn test_failure_with_matching_kind_reproduces() {
        let outcome = TestRunOutcome {
            passed: false,
            output: "FAIL: TypeError: Cannot read property 'x' of undefined".to_string(),
        };
        assert!(reproduces_failure(
            &outcome,
            &record("TypeError", "Cannot read property 'x' of undefined")
        ));
    }

    #[test]
    fn test_unrelated_failure_does_not_reproduce() {
        let outcome = TestRunOutcome {
            passed: false,
            output: "SyntaxError: unexpected end of input".to_string(),
        };
        assert!(!reproduces_failure(
            &outcome,
            &record("TypeError", "Cannot read property 'x' of undefined")
        ));
    }

    #[test]
    fn test_candidates_cover_conventions() {
        let candidates = test_file_candidates(Path::new("src/calc.ts"));
        assert!(candidates.contains(&PathBuf::from("src/calc.test.ts")));
        assert!(candidates.contains(&PathBuf::from("src/calc.spec.ts")));
        assert!(candidates.contains(&PathBuf::from("src/tests/calc.test.ts")));
    }

    #[test]
    fn test_generated_sibling_name() {
        assert_eq!(
            sibling_test_path(Path::new("src/calc.ts")),
            PathBuf::from("src/calc.test.ts")
        );
    }

    #[test]
    fn test_prompt_includes_error_and_source() {
        let r = record("TypeError", "Cannot read property 'x' of undefined");
        let prompt = build_prompt(&r, Path::new("src/calc.ts"), "const a = 1;", None, None);
        assert!(prompt.contains("TypeError"));
        assert!(prompt.contains("src/calc.ts"));
        assert!(prompt.contains("const a = 1;"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT"));
    }

    #[test]
    fn test_retry_prompt_carries_previous_output() {
        let r = record("TypeError", "boom boom boom");
        let prompt = build_prompt(
            &r,
            Path::new("src/calc.ts"),
            "src",
            None,
            Some("expected failure, test passed"),
        );
        assert!(prompt.contains("PREVIOUS ATTEMPT OUTPUT"));
        assert!(prompt.contains("expected failure, test passed"));
    }
}
