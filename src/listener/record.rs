//! Canonical error records
//!
//! An [`ErrorRecord`] is the normalized, deduplicated form of one detected
//! fault. Severity is computed once at detection time and never revisited.

use crate::bus::{ErrorContext, ErrorEvent};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

/// Error kinds that are critical regardless of message wording.
const CRITICAL_CODES: &[&str] = &["SIGSEGV", "SIGABRT", "OOM", "E_FATAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One parsed call frame from a raw stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub function: Option<String>,
}

/// Canonical, deduplicated representation of one detected fault.
///
/// Immutable after creation except for queue membership, the duplicate
/// sighting counter, and the resolution note written by the terminal
/// resolved transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub source: String,
    pub error_kind: String,
    pub message: String,
    pub stack_trace: Vec<StackFrame>,
    pub context: Option<ErrorContext>,
    pub severity: Severity,
    pub reproducible: bool,
    pub first_seen: DateTime<Utc>,
    /// How many times this fault has been sighted, duplicates included.
    pub seen_count: u32,
    /// Fix summary, set when the record reaches the resolved queue.
    pub resolution: Option<String>,
}

impl ErrorRecord {
    /// Normalize a bus notification into a candidate record.
    pub fn from_event(event: &ErrorEvent) -> Self {
        let error_kind = event
            .error_kind
            .clone()
            .unwrap_or_else(|| "UnknownError".to_string());
        let stack_trace = event
            .stack_trace_text
            .as_deref()
            .map(parse_stack_trace)
            .unwrap_or_default();
        let severity = classify_severity(&error_kind, &event.message);

        Self {
            id: Uuid::new_v4(),
            source: event.source_id.clone(),
            error_kind,
            message: event.message.clone(),
            stack_trace,
            context: event.context.clone(),
            severity,
            reproducible: event.reproducible,
            first_seen: event.timestamp(),
            seen_count: 1,
            resolution: None,
        }
    }

    /// The innermost frame, which names the file the fault surfaced in.
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack_trace.first()
    }
}

/// Classify severity from kind and message heuristics. First matching rule
/// wins; the result is stored on the record and never recomputed.
pub fn classify_severity(error_kind: &str, message: &str) -> Severity {
    let kind_upper = error_kind.to_uppercase();
    let haystack = format!("{} {}", error_kind, message).to_lowercase();

    if CRITICAL_CODES.iter().any(|code| kind_upper == *code)
        || haystack.contains("crash")
        || haystack.contains("fatal")
        || haystack.contains("panic")
    {
        return Severity::Critical;
    }

    if haystack.contains("timeout")
        || haystack.contains("network")
        || haystack.contains("connection")
    {
        return Severity::High;
    }

    if haystack.contains("typeerror")
        || haystack.contains("type error")
        || haystack.contains("referenceerror")
        || haystack.contains("reference error")
        || haystack.contains("syntaxerror")
        || haystack.contains("syntax error")
    {
        return Severity::Medium;
    }

    Severity::Low
}

fn frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches "at fn (file:line:col)" and the bare "at file:line:col" form.
    RE.get_or_init(|| {
        Regex::new(r"^\s*at\s+(?:(?P<func>.+?)\s+\()?(?P<file>[^()\s]+):(?P<line>\d+):(?P<col>\d+)\)?\s*$")
            .expect("frame regex is valid")
    })
}

/// Parse a raw trace string into frames, best-effort. Lines that do not
/// match the expected shape are skipped; a fully unparseable trace yields
/// zero frames, never an error.
pub fn parse_stack_trace(raw: &str) -> Vec<StackFrame> {
    raw.lines()
        .filter_map(|line| {
            let caps = frame_regex().captures(line)?;
            let file = caps.name("file")?.as_str().to_string();
            let line_no = caps.name("line")?.as_str().parse().ok()?;
            let column = caps.name("col")?.as_str().parse().ok()?;
            let function = caps.name("func").map(|m| m.as_str().to_string());
            Some(StackFrame {
                file,
                line: line_no,
                column,
                function,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_with_function_names() {
        let raw = "at compute (src/calc.ts:10:5)\nat main (src/index.ts:3:1)";
        let frames = parse_stack_trace(raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].file, "src/calc.ts");
        assert_eq!(frames[0].line, 10);
        assert_eq!(frames[0].column, 5);
        assert_eq!(frames[0].function.as_deref(), Some("compute"));
    }

    #[test]
    fn test_parse_trace_bare_location() {
        let frames = parse_stack_trace("  at src/io/reader.ts:42:17");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].file, "src/io/reader.ts");
        assert!(frames[0].function.is_none());
    }

    #[test]
    fn test_parse_trace_garbage_yields_no_frames() {
        assert!(parse_stack_trace("this is not a trace").is_empty());
        assert!(parse_stack_trace("").is_empty());
    }

    #[test]
    fn test_parse_trace_skips_bad_lines() {
        let raw = "TypeError: boom\nat compute (src/calc.ts:10:5)\n(unhelpful)";
        let frames = parse_stack_trace(raw);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_severity_critical() {
        assert_eq!(classify_severity("Error", "Fatal crash occurred"), Severity::Critical);
        assert_eq!(classify_severity("SIGSEGV", "boom"), Severity::Critical);
        assert_eq!(classify_severity("Error", "thread panicked"), Severity::Critical);
    }

    #[test]
    fn test_severity_high() {
        assert_eq!(classify_severity("Error", "Network timeout"), Severity::High);
        assert_eq!(classify_severity("Error", "connection refused"), Severity::High);
    }

    #[test]
    fn test_severity_medium() {
        assert_eq!(
            classify_severity("TypeError", "undefined is not a function"),
            Severity::Medium
        );
        assert_eq!(
            classify_severity("Error", "ReferenceError: y is not defined"),
            Severity::Medium
        );
    }

    #[test]
    fn test_severity_low_for_unmatched() {
        assert_eq!(classify_severity("Error", "something odd happened"), Severity::Low);
    }

    #[test]
    fn test_severity_first_rule_wins() {
        // "crash" outranks the timeout keyword on the same message.
        assert_eq!(
            classify_severity("Error", "crash during network timeout"),
            Severity::Critical
        );
    }

    #[test]
    fn test_record_from_event_defaults_kind() {
        let event = ErrorEvent {
            source_id: "svc".to_string(),
            message: "weird".to_string(),
            error_kind: None,
            stack_trace_text: None,
            context: None,
            timestamp_ms: 0,
            reproducible: false,
        };
        let record = ErrorRecord::from_event(&event);
        assert_eq!(record.error_kind, "UnknownError");
        assert_eq!(record.seen_count, 1);
        assert!(record.stack_trace.is_empty());
    }
}
