//! Line-wise patch application (§4.7 step 5c, §8 testable property 5). Validates a
//! model response against the structured-patch contract before ever touching file
//! bytes, then applies substitutions highest-line-first so earlier indices stay
//! valid (§4.7 "Ordering and tie-breaks").

use std::collections::HashSet;

use thiserror::Error;

use crate::model::{ChangeKind, LineChange};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("model returned no changes")]
    EmptyChanges,
    #[error("line {0} is out of range for a file of {1} lines")]
    LineOutOfRange(u32, usize),
    #[error("change content contains a NUL byte")]
    ContainsNulByte,
}

/// Validates changes against the file's current line count. Replace/Delete targets
/// must be `1..=line_count`; Insert may additionally target `line_count + 1` (append
/// after the last line).
pub fn validate_changes(changes: &[LineChange], line_count: usize) -> Result<(), PatchError> {
    if changes.is_empty() {
        return Err(PatchError::EmptyChanges);
    }
    for change in changes {
        if change.line_number == 0 {
            return Err(PatchError::LineOutOfRange(change.line_number, line_count));
        }
        let max_allowed = match change.kind {
            ChangeKind::InsertBefore => line_count as u32 + 1,
            ChangeKind::Replace | ChangeKind::Delete => line_count as u32,
        };
        if change.line_number > max_allowed {
            return Err(PatchError::LineOutOfRange(change.line_number, line_count));
        }
        if let Some(content) = &change.content {
            if content.contains('\0') {
                return Err(PatchError::ContainsNulByte);
            }
        }
    }
    Ok(())
}

/// Applies validated changes to `original`, preserving the file's line-ending style
/// (CRLF if present, else LF) and trailing-newline presence. Two changes on the same
/// line collapse into one application (the first wins; later ones were already
/// folded into context upstream per §4.7).
pub fn apply_changes(original: &str, changes: &[LineChange]) -> String {
    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let had_trailing_newline = original.ends_with('\n');

    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    let mut seen = HashSet::new();
    let mut deduped: Vec<&LineChange> = Vec::new();
    for change in changes {
        if seen.insert(change.line_number) {
            deduped.push(change);
        }
    }
    deduped.sort_by(|a, b| b.line_number.cmp(&a.line_number));

    for change in deduped {
        let idx = (change.line_number - 1) as usize;
        match change.kind {
            ChangeKind::Replace => {
                if idx < lines.len() {
                    lines[idx] = change.content.clone().unwrap_or_default();
                }
            }
            ChangeKind::Delete => {
                if idx < lines.len() {
                    lines.remove(idx);
                }
            }
            ChangeKind::InsertBefore => {
                let insert_idx = idx.min(lines.len());
                lines.insert(insert_idx, change.content.clone().unwrap_or_default());
            }
        }
    }

    let mut result = lines.join(eol);
    if had_trailing_newline && !result.is_empty() {
        result.push_str(eol);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(line_number: u32, content: &str) -> LineChange {
        LineChange {
            line_number,
            kind: ChangeKind::Replace,
            content: Some(content.to_string()),
            explanation: "test".to_string(),
        }
    }

    #[test]
    fn test_apply_single_replace_yields_exact_fixed_line() {
        let original = "import x;\nconst a = 1;\n";
        let changes = vec![replace(2, "const a = 2;")];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched, "import x;\nconst a = 2;\n");
    }

    #[test]
    fn test_line_count_unchanged_for_pure_replacements() {
        let original = "a\nb\nc\n";
        let changes = vec![replace(1, "A"), replace(3, "C")];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched.lines().count(), 3);
        assert_eq!(patched, "A\nb\nC\n");
    }

    #[test]
    fn test_highest_line_applied_first_keeps_indices_valid() {
        let original = "a\nb\nc\nd\n";
        let changes = vec![replace(1, "A"), replace(4, "D"), replace(2, "B")];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched, "A\nB\nc\nD\n");
    }

    #[test]
    fn test_duplicate_line_number_collapses_to_first() {
        let original = "a\nb\n";
        let changes = vec![replace(1, "first"), replace(1, "second")];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched, "first\nb\n");
    }

    #[test]
    fn test_delete_reduces_line_count() {
        let original = "a\nb\nc\n";
        let changes = vec![LineChange {
            line_number: 2,
            kind: ChangeKind::Delete,
            content: None,
            explanation: "remove".to_string(),
        }];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched, "a\nc\n");
    }

    #[test]
    fn test_insert_increases_line_count() {
        let original = "a\nb\n";
        let changes = vec![LineChange {
            line_number: 1,
            kind: ChangeKind::InsertBefore,
            content: Some("import x;".to_string()),
            explanation: "add import".to_string(),
        }];
        let patched = apply_changes(original, &changes);
        assert_eq!(patched, "import x;\na\nb\n");
    }

    #[test]
    fn test_preserves_crlf_line_endings() {
        let original = "a\r\nb\r\n";
        let patched = apply_changes(original, &[replace(1, "A")]);
        assert_eq!(patched, "A\r\nb\r\n");
    }

    #[test]
    fn test_validate_rejects_empty_changes() {
        assert_eq!(validate_changes(&[], 10), Err(PatchError::EmptyChanges));
    }

    #[test]
    fn test_validate_rejects_line_beyond_file_length() {
        let result = validate_changes(&[replace(5, "x")], 3);
        assert_eq!(result, Err(PatchError::LineOutOfRange(5, 3)));
    }

    #[test]
    fn test_validate_allows_line_number_equal_to_file_length() {
        assert!(validate_changes(&[replace(3, "x")], 3).is_ok());
    }

    #[test]
    fn test_validate_allows_single_line_file() {
        assert!(validate_changes(&[replace(1, "x")], 1).is_ok());
    }

    #[test]
    fn test_validate_rejects_nul_byte() {
        let change = replace(1, "bad\0content");
        assert_eq!(validate_changes(&[change], 3), Err(PatchError::ContainsNulByte));
    }

    #[test]
    fn test_validate_insert_may_target_one_past_file_length() {
        let change = LineChange {
            line_number: 4,
            kind: ChangeKind::InsertBefore,
            content: Some("x".to_string()),
            explanation: "append".to_string(),
        };
        assert!(validate_changes(&[change], 3).is_ok());
    }
}
