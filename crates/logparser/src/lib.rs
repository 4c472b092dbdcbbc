//! Log Parser (C5): extracts structured error records from raw CI log blobs.
//!
//! Grounded on `examples/5dlabs-cto/crates/healer/src/ci/router.rs`'s
//! `LazyLock<Vec<Regex>>` classification-pattern-table idiom, applied here to
//! `ErrorBlock` extraction instead of failure-type routing. Pure, stateless
//! (no I/O, no process-wide state — all scan state is a local variable of
//! [`parse`]), and deterministic: `parse(x) == parse(x)`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    LintError,
    TypeError,
    BuildFailure,
    TestFailure,
    DependencyError,
    ConfigError,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBlock {
    pub step: String,
    pub file: String,
    pub line: Option<u32>,
    pub error_type: ErrorType,
    pub message: String,
    pub severity: Severity,
}

const UNKNOWN_FILE: &str = "<unknown>";
const UNKNOWN_STEP: &str = "unknown";

static ANSI_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());
static TIMESTAMP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z?\s+").unwrap());
static STEP_GROUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^##\[group\](.+)$").unwrap());
static STEP_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Run\s+(.+)$").unwrap());

static RUST_ERROR_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^error(\[E\d+\])?:\s*(.+)$").unwrap());
static RUST_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-->\s*([\w./\-]+):(\d+):(\d+)").unwrap());
static RUST_PANIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"thread '.*' panicked at '(.+)', ([\w./\-]+):(\d+):(\d+)").unwrap()
});
static PYTHON_TRACE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*File "([^"]+)", line (\d+)"#).unwrap());
static GENERIC_COMPILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w./\-]+):(\d+):(\d+):?\s*(error|warning)\b:?\s*(.*)$").unwrap()
});
static TSC_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w./\-]+)\((\d+),(\d+)\):\s*(error|warning)\s+TS(\d+):\s*(.*)$").unwrap()
});
static ESLINT_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(\d+):(\d+)\s+(error|warning)\s+(.+)$").unwrap());
static ESLINT_FILE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/?[\w./\-]+\.(js|jsx|ts|tsx|mjs|cjs)$").unwrap());
static MODULE_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Module not found: Error: Can't resolve '([^']+)'").unwrap());
static NOT_ASSIGNABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Type '.*' is not assignable to type '.*'").unwrap());
static ASSERTION_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)assertionerror|assertion failed|expect\(.*\)\.to").unwrap()
});
static CONFIG_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(Cargo\.toml|package\.json|\.ya?ml).*(invalid|error|parse)").unwrap());

fn severity_for(error_type: ErrorType, level: Option<&str>) -> Severity {
    if level == Some("warning") {
        return Severity::Low;
    }
    match error_type {
        ErrorType::BuildFailure | ErrorType::TestFailure => Severity::High,
        ErrorType::TypeError | ErrorType::DependencyError | ErrorType::ConfigError => Severity::Medium,
        ErrorType::LintError | ErrorType::Unknown => Severity::Low,
    }
}

fn sanitize_line(raw: &str) -> String {
    let no_ansi = ANSI_CODE.replace_all(raw, "");
    TIMESTAMP_PREFIX.replace(&no_ansi, "").to_string()
}

/// Parses a raw log blob into an ordered, deterministic sequence of [`ErrorBlock`]s.
/// Pure and stateless: all state lives in locals of this call, never across calls.
#[must_use]
pub fn parse(raw_log: &str) -> Vec<ErrorBlock> {
    let mut blocks: Vec<ErrorBlock> = Vec::new();
    let mut current_step = UNKNOWN_STEP.to_string();
    let mut current_lint_file: Option<String> = None;

    let lines: Vec<String> = raw_log.lines().map(sanitize_line).collect();
    let mut i = 0usize;
    while i < lines.len() {
        let line = &lines[i];

        if let Some(caps) = STEP_GROUP.captures(line).or_else(|| STEP_RUN.captures(line)) {
            current_step = caps[1].trim().to_string();
            i += 1;
            continue;
        }

        if let Some(caps) = RUST_ERROR_HEADER.captures(line) {
            let message = caps[2].to_string();
            let mut file = UNKNOWN_FILE.to_string();
            let mut line_no = None;
            for lookahead in &lines[i + 1..lines.len().min(i + 4)] {
                if let Some(loc) = RUST_LOCATION.captures(lookahead) {
                    file = loc[1].to_string();
                    line_no = loc[2].parse().ok();
                    break;
                }
            }
            push_block(
                &mut blocks,
                &current_step,
                &file,
                line_no,
                ErrorType::BuildFailure,
                &message,
                severity_for(ErrorType::BuildFailure, Some("error")),
            );
            i += 1;
            continue;
        }

        if let Some(caps) = RUST_PANIC.captures(line) {
            push_block(
                &mut blocks,
                &current_step,
                &caps[2],
                caps[3].parse().ok(),
                ErrorType::TestFailure,
                &caps[1],
                Severity::High,
            );
            i += 1;
            continue;
        }

        if let Some(caps) = PYTHON_TRACE_FILE.captures(line) {
            let file = caps[1].to_string();
            let line_no: Option<u32> = caps[2].parse().ok();
            let message = lines[i + 1..]
                .iter()
                .find(|l| !l.trim().is_empty())
                .cloned()
                .unwrap_or_default();
            let error_type = if message.contains("Type") {
                ErrorType::TypeError
            } else {
                ErrorType::Unknown
            };
            push_block(
                &mut blocks,
                &current_step,
                &file,
                line_no,
                error_type,
                message.trim(),
                severity_for(error_type, Some("error")),
            );
            i += 1;
            continue;
        }

        if let Some(caps) = TSC_STYLE.captures(line) {
            let level = &caps[4];
            push_block(
                &mut blocks,
                &current_step,
                &caps[1],
                caps[2].parse().ok(),
                ErrorType::TypeError,
                &caps[6],
                severity_for(ErrorType::TypeError, Some(level)),
            );
            i += 1;
            continue;
        }

        if let Some(caps) = GENERIC_COMPILER.captures(line) {
            let level = &caps[4];
            let message = caps[5].to_string();
            let error_type = classify_message(&message).unwrap_or(ErrorType::BuildFailure);
            let severity = severity_for(error_type, Some(level));
            push_block(
                &mut blocks,
                &current_step,
                &caps[1],
                caps[2].parse().ok(),
                error_type,
                &message,
                severity,
            );
            i += 1;
            continue;
        }

        if ESLINT_FILE_HEADER.is_match(line.trim()) {
            current_lint_file = Some(line.trim().to_string());
            i += 1;
            continue;
        }

        if let Some(caps) = ESLINT_LOCATION.captures(line) {
            let level = &caps[3];
            let severity = severity_for(ErrorType::LintError, Some(level));
            let file = current_lint_file.clone().unwrap_or_else(|| UNKNOWN_FILE.to_string());
            push_block(
                &mut blocks,
                &current_step,
                &file,
                caps[1].parse().ok(),
                ErrorType::LintError,
                &caps[4],
                severity,
            );
            i += 1;
            continue;
        }

        if let Some(caps) = MODULE_NOT_FOUND.captures(line) {
            push_block(
                &mut blocks,
                &current_step,
                UNKNOWN_FILE,
                None,
                ErrorType::DependencyError,
                &format!("Cannot resolve '{}'", &caps[1]),
                severity_for(ErrorType::DependencyError, None),
            );
            i += 1;
            continue;
        }

        if NOT_ASSIGNABLE.is_match(line) {
            push_block(
                &mut blocks,
                &current_step,
                UNKNOWN_FILE,
                None,
                ErrorType::TypeError,
                line,
                severity_for(ErrorType::TypeError, None),
            );
            i += 1;
            continue;
        }

        if ASSERTION_FAILURE.is_match(line) {
            push_block(
                &mut blocks,
                &current_step,
                UNKNOWN_FILE,
                None,
                ErrorType::TestFailure,
                line,
                severity_for(ErrorType::TestFailure, None),
            );
            i += 1;
            continue;
        }

        if CONFIG_ERROR.is_match(line) {
            push_block(
                &mut blocks,
                &current_step,
                UNKNOWN_FILE,
                None,
                ErrorType::ConfigError,
                line,
                severity_for(ErrorType::ConfigError, None),
            );
            i += 1;
            continue;
        }

        i += 1;
    }

    blocks
}

fn classify_message(message: &str) -> Option<ErrorType> {
    if NOT_ASSIGNABLE.is_match(message) {
        Some(ErrorType::TypeError)
    } else if ASSERTION_FAILURE.is_match(message) {
        Some(ErrorType::TestFailure)
    } else {
        None
    }
}

/// Groups contiguous lines sharing the same `(file, line)` into one block,
/// preserving the first full message (§4.5).
fn push_block(
    blocks: &mut Vec<ErrorBlock>,
    step: &str,
    file: &str,
    line: Option<u32>,
    error_type: ErrorType,
    message: &str,
    severity: Severity,
) {
    if let Some(last) = blocks.last() {
        if last.file == file && last.line == line {
            return;
        }
    }
    blocks.push(ErrorBlock {
        step: step.to_string(),
        file: file.to_string(),
        line,
        error_type,
        message: message.trim().to_string(),
        severity,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log_yields_empty_sequence() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n\n").is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let log = "src/app.ts:42:5 error 'React' is not defined\nsome other line";
        assert_eq!(parse(log), parse(log));
    }

    #[test]
    fn test_generic_compiler_error_with_file_line_col() {
        let log = "src/app.ts:42:5 error 'React' is not defined";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "src/app.ts");
        assert_eq!(blocks[0].line, Some(42));
        assert!(blocks[0].message.contains("React"));
    }

    #[test]
    fn test_rust_compiler_error_two_line_location() {
        let log = "error[E0425]: cannot find value `x` in this scope\n  --> src/main.rs:10:5\n   |";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "src/main.rs");
        assert_eq!(blocks[0].line, Some(10));
        assert_eq!(blocks[0].error_type, ErrorType::BuildFailure);
    }

    #[test]
    fn test_contiguous_same_location_lines_collapse_to_one_block() {
        let log = "src/app.ts:42:5 error 'React' is not defined\nsrc/app.ts:42:5 error 'React' is not defined";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1, "duplicate contiguous (file,line) must collapse");
    }

    #[test]
    fn test_distinct_locations_do_not_collapse() {
        let log = "src/a.ts:1:1 error one\nsrc/b.ts:2:2 error two";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_strips_ansi_color_codes() {
        let log = "\x1b[31msrc/app.ts:42:5 error 'React' is not defined\x1b[0m";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "src/app.ts");
    }

    #[test]
    fn test_strips_timestamp_prefix() {
        let log = "2024-01-01T00:00:00.123Z src/app.ts:42:5 error 'React' is not defined";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "src/app.ts");
    }

    #[test]
    fn test_crlf_and_bare_lf_mix() {
        let log = "src/a.ts:1:1 error one\r\nsrc/b.ts:2:2 error two\n";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_module_not_found_is_dependency_error() {
        let log = "Module not found: Error: Can't resolve 'left-pad'";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].error_type, ErrorType::DependencyError);
    }

    #[test]
    fn test_eslint_style_lint_error_uses_preceding_file_header() {
        let log = "src/app.js\n  10:5  error  'foo' is not defined  no-undef";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].error_type, ErrorType::LintError);
        assert_eq!(blocks[0].file, "src/app.js");
        assert_eq!(blocks[0].line, Some(10));
    }

    #[test]
    fn test_warning_level_maps_to_low_severity() {
        let log = "src/app.ts:1:1 warning something is unused";
        let blocks = parse(log);
        assert_eq!(blocks[0].severity, Severity::Low);
    }

    #[test]
    fn test_step_grouping_tracks_most_recent_run_header() {
        let log = "##[group]Run cargo test\nsrc/a.rs:1:1 error boom";
        let blocks = parse(log);
        assert_eq!(blocks[0].step, "cargo test");
    }

    #[test]
    fn test_interleaved_stdout_stderr_tolerated() {
        let log = "some unrelated stdout noise\nsrc/a.ts:1:1 error boom\nmore noise\nsrc/b.ts:2:2 error bang";
        let blocks = parse(log);
        assert_eq!(blocks.len(), 2);
    }
}
