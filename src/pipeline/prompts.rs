pub const REPRO_TEST_PROMPT: &str = r#"Write ONE test that reproduces the production error described below.

REQUIREMENTS:
- The test must exercise the failing code path and assert on the error
- Against the CURRENT (broken) source the test must FAIL, surfacing the same error
- Match the style of the existing tests when provided
- Output ONLY the test source, no prose, no markdown fences
"#;

pub const REPRO_RETRY_NOTE: &str = r#"Your previous test did not reproduce the error. The run output is included below under PREVIOUS ATTEMPT OUTPUT. Adjust the test so it triggers the original error against the current source. Output ONLY the corrected test source.
"#;

pub const PATCH_PROMPT: &str = r#"Produce a minimal patch for the error described below. The reproduction test included in the request must pass after your change.

OUTPUT FORMAT:
For every file you change, output one block:
<<<FILE path/relative/to/repo
...the COMPLETE new content of that file...
FILE>>>
After the last block, a single line:
RATIONALE: one sentence describing the fix

RULES:
- Output the complete file content in each block, not a fragment
- Change as little as possible; do not reformat or clean up unrelated code
- Do not modify the reproduction test itself
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_prompt_names_the_block_markers() {
        // The parser depends on these exact markers.
        assert!(PATCH_PROMPT.contains("<<<FILE"));
        assert!(PATCH_PROMPT.contains("FILE>>>"));
        assert!(PATCH_PROMPT.contains("RATIONALE:"));
    }

    #[test]
    fn test_repro_prompt_demands_failure() {
        assert!(REPRO_TEST_PROMPT.contains("FAIL"));
    }
}
