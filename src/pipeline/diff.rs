//! Unified diff rendering
//!
//! Produces the human-readable diff attached to each file change and
//! embedded in pull-request bodies. One hunk covering the changed region
//! with up to three lines of context on each side.

use std::path::Path;

const CONTEXT_LINES: usize = 3;

/// Render a unified diff between two versions of a file. Returns an empty
/// string when the contents are identical.
pub fn unified_diff(path: &Path, original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }

    let old_lines: Vec<&str> = original.lines().collect();
    let new_lines: Vec<&str> = modified.lines().collect();

    // Trim the common prefix and suffix; everything between differs.
    let mut prefix = 0;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < old_lines.len() - prefix
        && suffix < new_lines.len() - prefix
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed = &old_lines[prefix..old_lines.len() - suffix];
    let added = &new_lines[prefix..new_lines.len() - suffix];

    let context_before = prefix.min(CONTEXT_LINES);
    let context_after = suffix.min(CONTEXT_LINES);

    let old_count = context_before + removed.len() + context_after;
    let new_count = context_before + added.len() + context_after;
    let old_start = if old_count == 0 { prefix } else { prefix - context_before + 1 };
    let new_start = if new_count == 0 { prefix } else { prefix - context_before + 1 };

    let mut out = String::new();
    out.push_str(&format!("--- a/{}\n", path.display()));
    out.push_str(&format!("+++ b/{}\n", path.display()));
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        old_start, old_count, new_start, new_count
    ));

    for line in &old_lines[prefix - context_before..prefix] {
        out.push_str(&format!(" {}\n", line));
    }
    for line in removed {
        out.push_str(&format!("-{}\n", line));
    }
    for line in added {
        out.push_str(&format!("+{}\n", line));
    }
    for line in &old_lines[old_lines.len() - suffix..old_lines.len() - suffix + context_after] {
        out.push_str(&format!(" {}\n", line));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_identical_content_yields_empty_diff() {
        let path = PathBuf::from("src/calc.ts");
        assert_eq!(unified_diff(&path, "a\nb\n", "a\nb\n"), "");
    }

    #[test]
    fn test_single_line_change() {
        let path = PathBuf::from("src/calc.ts");
        let diff = unified_diff(&path, "one\ntwo\nthree\n", "one\nTWO\nthree\n");
        assert!(diff.contains("--- a/src/calc.ts"));
        assert!(diff.contains("+++ b/src/calc.ts"));
        assert!(diff.contains("-two"));
        assert!(diff.contains("+TWO"));
        assert!(diff.contains(" one"));
        assert!(diff.contains(" three"));
    }

    #[test]
    fn test_new_file_diff_is_all_additions() {
        let path = PathBuf::from("src/new.ts");
        let diff = unified_diff(&path, "", "line1\nline2\n");
        assert!(diff.contains("@@ -0,0 +1,2 @@"));
        assert!(diff.contains("+line1"));
        assert!(diff.contains("+line2"));
        assert!(!diff.contains("\n-"));
    }

    #[test]
    fn test_pure_insertion_keeps_context() {
        let path = PathBuf::from("f");
        let diff = unified_diff(&path, "a\nb\n", "a\nx\nb\n");
        assert!(diff.contains("+x"));
        assert!(diff.contains(" a"));
        assert!(diff.contains(" b"));
    }

    #[test]
    fn test_context_capped_at_three_lines() {
        let path = PathBuf::from("f");
        let original = "1\n2\n3\n4\n5\n6\nX\n7\n8\n9\n10\n11\n12\n";
        let modified = "1\n2\n3\n4\n5\n6\nY\n7\n8\n9\n10\n11\n12\n";
        let diff = unified_diff(&path, original, modified);
        assert!(diff.contains("@@ -4,7 +4,7 @@"));
        assert!(!diff.contains(" 1\n"));
        assert!(!diff.contains(" 12\n"));
    }
}
