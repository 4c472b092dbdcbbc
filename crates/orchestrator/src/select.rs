//! Candidate-file selection (§4.7 step 4): group log-parser output by file, rank,
//! and truncate to the orchestrator's per-PR budgets.

use std::cmp::Reverse;

use logparser::ErrorBlock;

#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub file: String,
    pub blocks: Vec<ErrorBlock>,
}

fn rank_key(blocks: &[ErrorBlock]) -> (bool, logparser::Severity, usize) {
    let has_line = blocks.iter().any(|b| b.line.is_some());
    let max_severity = blocks.iter().map(|b| b.severity).max().unwrap_or(logparser::Severity::Low);
    (has_line, max_severity, blocks.len())
}

/// Groups blocks by file, ranks files by `(has_line?, max_severity, block_count)`
/// descending, keeps at most `max_files`, and within each kept file keeps the top
/// `max_errors_per_file` blocks by the same per-block ranking. The returned order
/// is the stable processing order used again in §4.7 step 6 ("Files are processed
/// in the stable order defined in step 4").
#[must_use]
pub fn select_candidates(
    blocks: Vec<ErrorBlock>,
    max_files: usize,
    max_errors_per_file: usize,
) -> Vec<FileCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: std::collections::HashMap<String, Vec<ErrorBlock>> = std::collections::HashMap::new();
    for block in blocks {
        if !grouped.contains_key(&block.file) {
            order.push(block.file.clone());
        }
        grouped.entry(block.file.clone()).or_default().push(block);
    }

    let mut files: Vec<FileCandidate> = order
        .into_iter()
        .map(|file| {
            let blocks = grouped.remove(&file).unwrap_or_default();
            FileCandidate { file, blocks }
        })
        .collect();

    files.sort_by_key(|f| Reverse(rank_key(&f.blocks)));
    files.truncate(max_files);

    for candidate in &mut files {
        candidate
            .blocks
            .sort_by_key(|b| Reverse((b.line.is_some(), b.severity)));
        candidate.blocks.truncate(max_errors_per_file);
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use logparser::{ErrorType, Severity};

    fn block(file: &str, line: Option<u32>, severity: Severity) -> ErrorBlock {
        ErrorBlock {
            step: "build".to_string(),
            file: file.to_string(),
            line,
            error_type: ErrorType::BuildFailure,
            message: "boom".to_string(),
            severity,
        }
    }

    #[test]
    fn test_ranks_files_with_line_info_first() {
        let blocks = vec![
            block("no_line.rs", None, Severity::Critical),
            block("has_line.rs", Some(1), Severity::Low),
        ];
        let candidates = select_candidates(blocks, 3, 5);
        assert_eq!(candidates[0].file, "has_line.rs");
    }

    #[test]
    fn test_truncates_to_max_files() {
        let blocks = vec![
            block("a.rs", Some(1), Severity::High),
            block("b.rs", Some(1), Severity::High),
            block("c.rs", Some(1), Severity::High),
        ];
        let candidates = select_candidates(blocks, 2, 5);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_truncates_blocks_per_file() {
        let blocks = (1..=10)
            .map(|line| block("a.rs", Some(line), Severity::Medium))
            .collect();
        let candidates = select_candidates(blocks, 3, 5);
        assert_eq!(candidates[0].blocks.len(), 5);
    }

    #[test]
    fn test_ties_broken_by_block_count() {
        let blocks = vec![
            block("one_error.rs", Some(1), Severity::High),
            block("two_errors.rs", Some(1), Severity::High),
            block("two_errors.rs", Some(2), Severity::High),
        ];
        let candidates = select_candidates(blocks, 2, 5);
        assert_eq!(candidates[0].file, "two_errors.rs");
    }
}
