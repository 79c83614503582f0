//! Pipeline error taxonomy
//!
//! Every stage failure the orchestrator can observe is one of these
//! variants. Collaborator implementations report plain `anyhow` errors;
//! the pipeline components translate them at stage boundaries.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    /// The target source file could not be read. Not retryable without
    /// operator intervention, but the record still returns to the
    /// unprocessed queue like any other stage failure.
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The completion service could not be reached or returned garbage.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The generated test still does not reproduce the failure after the
    /// corrective retry.
    #[error("test did not reproduce the failure: {detail}")]
    Unreproduced { detail: String },

    /// The completion response contained no extractable file changes.
    #[error("completion response contained no usable file changes")]
    NoPatchProduced,

    /// The patch did not make the reproduction test pass. By the time this
    /// is raised, every touched file has been restored to its pre-patch
    /// content.
    #[error("patch failed verification and was reverted: {test_output}")]
    VerificationFailed { test_output: String },

    /// A version-control or code-hosting step failed after a verified
    /// patch existed.
    #[error("pull request submission failed: {0}")]
    SubmissionFailed(String),

    /// An external call exceeded its timeout. Treated as a stage failure.
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RemedyError>;

impl RemedyError {
    /// Short machine-friendly tag, used in logs and job history.
    pub fn kind(&self) -> &'static str {
        match self {
            RemedyError::SourceUnavailable { .. } => "source-unavailable",
            RemedyError::GenerationFailed(_) => "generation-failed",
            RemedyError::Unreproduced { .. } => "unreproduced",
            RemedyError::NoPatchProduced => "no-patch-produced",
            RemedyError::VerificationFailed { .. } => "verification-failed",
            RemedyError::SubmissionFailed(_) => "submission-failed",
            RemedyError::Timeout { .. } => "timeout",
            RemedyError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_tags_are_stable() {
        let err = RemedyError::VerificationFailed {
            test_output: "assertion failed".to_string(),
        };
        assert_eq!(err.kind(), "verification-failed");
        assert!(err.to_string().contains("reverted"));
    }

    #[test]
    fn test_source_unavailable_names_the_path() {
        let err = RemedyError::SourceUnavailable {
            path: PathBuf::from("src/calc.ts"),
            reason: "no such file".to_string(),
        };
        assert!(err.to_string().contains("src/calc.ts"));
    }
}
