//! Entities of §3: Principal, OAuthConnection, RepositoryConnection, WorkflowRun,
//! Incident, PullRequestRecord.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vault::Ciphertext;

/// Opaque authenticated user identity, owned externally (identity/session issuance is
/// out of scope; the core only ever consumes a validated principal).
pub type Principal = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConnection {
    pub id: Uuid,
    pub user_id: Principal,
    pub provider: String,
    pub encrypted_access_token: Ciphertext,
    pub encrypted_refresh_token: Option<Ciphertext>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_user_id: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthConnection {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    NotProvisioned,
    Active,
    Inactive,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConnection {
    pub id: Uuid,
    pub user_id: Principal,
    pub repository_full_name: String,
    pub oauth_connection_id: Uuid,
    pub webhook_id: Option<u64>,
    pub encrypted_webhook_secret: Option<Ciphertext>,
    pub webhook_url: Option<String>,
    pub events: Vec<String>,
    pub webhook_status: WebhookStatus,
    pub auto_pr_enabled: bool,
    pub is_enabled: bool,
    pub default_branch: String,
    pub webhook_last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryConnection {
    /// Invariant: if `webhook_status == Active` then both `webhook_id` and the
    /// encrypted secret must be present.
    pub fn invariant_holds(&self) -> bool {
        if self.webhook_status == WebhookStatus::Active {
            self.webhook_id.is_some() && self.encrypted_webhook_secret.is_some()
        } else {
            true
        }
    }

    pub fn clear_webhook(&mut self) {
        self.webhook_id = None;
        self.encrypted_webhook_secret = None;
        self.webhook_url = None;
        self.webhook_status = WebhookStatus::Inactive;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Success | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub repository_connection_id: Uuid,
    pub provider_run_id: String,
    pub status: WorkflowStatus,
    pub conclusion: Option<String>,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub author: String,
    pub run_url: String,
    pub event_payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

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
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub user_id: Principal,
    pub repository_connection_id: Option<Uuid>,
    pub workflow_run_id: Option<Uuid>,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub source: String,
    pub failure_type: String,
    pub error_message: String,
    pub root_cause: Option<String>,
    pub confidence: Option<f32>,
    /// At-most-once remediation guard: set the moment a remediation attempt is
    /// dispatched, checked atomically by the tracker before dispatch.
    pub remediation_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub incident_id: Uuid,
    pub pr_number: u64,
    pub pr_url: String,
    pub branch_name: String,
    pub state: PullRequestState,
    pub created_at: DateTime<Utc>,
}
