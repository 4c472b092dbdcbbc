//! Error taxonomy (§7): typed kinds, not exceptions.

use thiserror::Error;

/// The seven-member error taxonomy shared across components. Each variant dictates
/// its own propagation policy (see §7): `Transient` is retried internally by the
/// provider client; everything else surfaces to the caller or the incident record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemediationError {
    #[error("rejected: {0}")]
    InputRejected(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("provider unavailable, retry after {retry_after_s:?}s: {message}")]
    ProviderUnavailable {
        message: String,
        retry_after_s: Option<u64>,
    },

    #[error("model failure: {0}")]
    ModelFailure(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl RemediationError {
    /// The terminal failure reason recorded on an Incident when this error ends a
    /// remediation attempt (§4.7 step 7 / §7).
    pub fn incident_failure_reason(&self) -> &'static str {
        match self {
            RemediationError::InputRejected(_) => "failed_input_rejected",
            RemediationError::AuthFailed(_) => "failed_no_credentials",
            RemediationError::Transient(_) => "failed_transient",
            RemediationError::ProviderUnavailable { .. } => "failed_provider",
            RemediationError::ModelFailure(_) => "failed_no_signal",
            RemediationError::Conflict(_) => "failed_conflict",
            RemediationError::Fatal(_) => "failed_fatal",
        }
    }
}
