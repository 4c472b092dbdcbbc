//! The LLM is consumed as an injected capability (§9 Design Notes: "the LLM
//! provider ... consumed as an opaque `generate_solution` capability"). No concrete
//! LLM HTTP client ships in this crate — only the trait and a deterministic
//! [`MockPatchModel`] used in tests, since the LLM provider is explicitly out of
//! scope (spec §1).

use async_trait::async_trait;
use logparser::ErrorBlock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Replace,
    InsertBefore,
    Delete,
}

/// One line-level edit, validated before application (§4.7 step 5b: "non-empty
/// changes, every line_number within file length, no NUL bytes, UTF-8 clean").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineChange {
    pub line_number: u32,
    pub kind: ChangeKind,
    /// Replacement/inserted text. Unused (ignored) for `Delete`.
    pub content: Option<String>,
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub repository: String,
    pub workflow: String,
    pub file_path: String,
    pub file_content: String,
    pub error_blocks: Vec<ErrorBlock>,
}

#[derive(Debug, Clone)]
pub struct PatchResponse {
    pub changes: Vec<LineChange>,
    pub rationale: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("model returned no usable changes")]
    EmptyResponse,
    #[error("model response invalid: {0}")]
    Invalid(String),
    #[error("model call failed: {0}")]
    CallFailed(String),
}

#[async_trait]
pub trait PatchModel: Send + Sync {
    async fn generate_patch(&self, request: PatchRequest) -> Result<PatchResponse, ModelError>;
}

/// Deterministic stand-in for the real LLM, used in tests and as a reference
/// implementation of the response contract. For every error block that carries a
/// line number, emits a `Replace` change; error blocks with no line number
/// contribute no change (the caller still validates at least one change exists).
pub struct MockPatchModel;

#[async_trait]
impl PatchModel for MockPatchModel {
    async fn generate_patch(&self, request: PatchRequest) -> Result<PatchResponse, ModelError> {
        let changes: Vec<LineChange> = request
            .error_blocks
            .iter()
            .filter_map(|block| {
                let line_number = block.line?;
                Some(LineChange {
                    line_number,
                    kind: ChangeKind::Replace,
                    content: Some(format!("// remediation: {}", block.message)),
                    explanation: block.message.clone(),
                })
            })
            .collect();

        if changes.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(PatchResponse {
            rationale: format!(
                "Applied {} line-level fix(es) to {} based on the failing workflow's logs.",
                changes.len(),
                request.file_path
            ),
            changes,
        })
    }
}
