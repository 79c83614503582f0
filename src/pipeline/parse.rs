//! Completion-response parsing
//!
//! LLM output is hostile input: fenced, prefixed with prose, or missing
//! the requested structure entirely. Everything here is tolerant and
//! returns empty results rather than guessing.

use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Strip surrounding markdown code fences from a response.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn file_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<<<FILE\s+(?P<path>[^\r\n]+)\r?\n(?P<content>.*?)FILE>>>")
            .expect("file block regex is valid")
    })
}

/// Extract `{file, modified_content}` pairs from a patch response.
/// Returns an empty vec when the response carries no blocks.
pub fn parse_file_changes(response: &str) -> Vec<(PathBuf, String)> {
    file_block_regex()
        .captures_iter(response)
        .filter_map(|caps| {
            let path = caps.name("path")?.as_str().trim();
            if path.is_empty() {
                return None;
            }
            let content = caps.name("content")?.as_str();
            // The marker sits on its own line; drop the trailing newline
            // that belongs to it, not to the file.
            let content = content.strip_suffix('\n').unwrap_or(content);
            Some((PathBuf::from(path), content.to_string()))
        })
        .collect()
}

/// Extract the one-line rationale, if the model provided one.
pub fn extract_rationale(response: &str) -> Option<String> {
    response
        .lines()
        .find_map(|line| line.trim().strip_prefix("RATIONALE:"))
        .map(|rest| rest.trim().to_string())
        .filter(|s| !s.is_empty())
}
