//! Repository abstraction (§9 Design Notes: "hide the store behind a repository
//! abstraction exposing only the upsert/guard operations enumerated, not free-form
//! query"). `InMemoryStore` is the only implementation shipped here; a relational
//! implementation is out of scope (§1: "the persistence engine").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::*;
use crate::error::RemediationError;

/// Fields of a `WorkflowRun` carried by a single webhook delivery. `event_updated_at`
/// is the provider-supplied timestamp (not wall-clock receipt time) used to resolve
/// out-of-order/duplicate deliveries (testable property 3).
#[derive(Debug, Clone)]
pub struct WorkflowRunDelta {
    pub status: WorkflowStatus,
    pub conclusion: Option<String>,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub author: String,
    pub run_url: String,
    pub event_payload: serde_json::Value,
    pub event_updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_oauth_connection(
        &self,
        conn: OAuthConnection,
    ) -> Result<OAuthConnection, RemediationError>;
    async fn get_active_oauth_connection(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Option<OAuthConnection>;
    async fn get_oauth_connection_by_id(&self, id: Uuid) -> Option<OAuthConnection>;
    async fn revoke_oauth_connection(&self, id: Uuid) -> Result<(), RemediationError>;
    async fn list_oauth_connections(&self, user_id: &str) -> Vec<OAuthConnection>;

    async fn insert_repository_connection(
        &self,
        conn: RepositoryConnection,
    ) -> Result<RepositoryConnection, RemediationError>;
    async fn get_repository_connection(&self, id: Uuid) -> Option<RepositoryConnection>;
    async fn get_repository_connection_by_full_name(
        &self,
        full_name: &str,
    ) -> Option<RepositoryConnection>;
    async fn update_repository_connection(
        &self,
        conn: RepositoryConnection,
    ) -> Result<(), RemediationError>;
    async fn list_repository_connections(&self, user_id: &str) -> Vec<RepositoryConnection>;
    async fn delete_repository_connection(&self, id: Uuid) -> Result<(), RemediationError>;

    /// Idempotent on `(repository_connection_id, provider_run_id)`. Returns the
    /// resulting run and whether this call's delta actually produced a change
    /// (stale/duplicate deliveries are accepted but reported as unchanged).
    async fn upsert_workflow_run(
        &self,
        repository_connection_id: Uuid,
        provider_run_id: &str,
        delta: WorkflowRunDelta,
    ) -> (WorkflowRun, bool);

    async fn get_open_incident_for_workflow_run(&self, workflow_run_id: Uuid) -> Option<Incident>;
    async fn get_incident(&self, incident_id: Uuid) -> Option<Incident>;
    async fn create_incident(&self, incident: Incident) -> Result<Incident, RemediationError>;
    async fn update_incident(&self, incident: Incident) -> Result<(), RemediationError>;

    /// Atomically claims the at-most-once remediation guard on an incident. Returns
    /// `true` only for the caller that transitions `remediation_attempted_at` from
    /// `None` to `Some(now)`; all other concurrent callers observe `false`.
    async fn try_claim_remediation(&self, incident_id: Uuid) -> Result<bool, RemediationError>;

    async fn create_pull_request_record(
        &self,
        record: PullRequestRecord,
    ) -> Result<(), RemediationError>;
    async fn get_pull_request_record_for_incident(
        &self,
        incident_id: Uuid,
    ) -> Option<PullRequestRecord>;
}

#[derive(Default)]
struct Tables {
    oauth_connections: HashMap<Uuid, OAuthConnection>,
    repository_connections: HashMap<Uuid, RepositoryConnection>,
    workflow_runs: HashMap<(Uuid, String), WorkflowRun>,
    incidents: HashMap<Uuid, Incident>,
    pull_request_records: HashMap<Uuid, PullRequestRecord>,
}

/// In-memory `Store` implementation, grounded on the
/// `Arc<RwLock<HashMap<...>>>` state pattern used throughout the reference
/// workspace's `RemediationTracker`.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_oauth_connection(
        &self,
        mut conn: OAuthConnection,
    ) -> Result<OAuthConnection, RemediationError> {
        let mut tables = self.tables.write().await;
        // Invariant: at most one *active* connection per (user_id, provider).
        let existing_active = tables
            .oauth_connections
            .values()
            .find(|c| c.user_id == conn.user_id && c.provider == conn.provider && c.is_active())
            .map(|c| c.id);
        if let Some(existing_id) = existing_active {
            conn.id = existing_id;
        }
        tables.oauth_connections.insert(conn.id, conn.clone());
        Ok(conn)
    }

    async fn get_active_oauth_connection(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Option<OAuthConnection> {
        let tables = self.tables.read().await;
        tables
            .oauth_connections
            .values()
            .find(|c| c.user_id == user_id && c.provider == provider && c.is_active())
            .cloned()
    }

    async fn get_oauth_connection_by_id(&self, id: Uuid) -> Option<OAuthConnection> {
        self.tables.read().await.oauth_connections.get(&id).cloned()
    }

    async fn revoke_oauth_connection(&self, id: Uuid) -> Result<(), RemediationError> {
        let mut tables = self.tables.write().await;
        let conn = tables
            .oauth_connections
            .get_mut(&id)
            .ok_or_else(|| RemediationError::InputRejected("no such oauth connection".into()))?;
        conn.revoked_at = Some(Utc::now());
        conn.updated_at = Utc::now();
        Ok(())
    }

    async fn list_oauth_connections(&self, user_id: &str) -> Vec<OAuthConnection> {
        self.tables
            .read()
            .await
            .oauth_connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn insert_repository_connection(
        &self,
        conn: RepositoryConnection,
    ) -> Result<RepositoryConnection, RemediationError> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.repository_connections.values().any(|c| {
            c.user_id == conn.user_id && c.repository_full_name == conn.repository_full_name
        });
        if duplicate {
            return Err(RemediationError::Conflict(format!(
                "repository connection already exists for {}",
                conn.repository_full_name
            )));
        }
        tables.repository_connections.insert(conn.id, conn.clone());
        Ok(conn)
    }

    async fn get_repository_connection(&self, id: Uuid) -> Option<RepositoryConnection> {
        self.tables
            .read()
            .await
            .repository_connections
            .get(&id)
            .cloned()
    }

    async fn get_repository_connection_by_full_name(
        &self,
        full_name: &str,
    ) -> Option<RepositoryConnection> {
        self.tables
            .read()
            .await
            .repository_connections
            .values()
            .find(|c| c.repository_full_name == full_name)
            .cloned()
    }

    async fn update_repository_connection(
        &self,
        conn: RepositoryConnection,
    ) -> Result<(), RemediationError> {
        let mut tables = self.tables.write().await;
        if !tables.repository_connections.contains_key(&conn.id) {
            return Err(RemediationError::InputRejected(
                "no such repository connection".into(),
            ));
        }
        tables.repository_connections.insert(conn.id, conn);
        Ok(())
    }

    async fn list_repository_connections(&self, user_id: &str) -> Vec<RepositoryConnection> {
        self.tables
            .read()
            .await
            .repository_connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn delete_repository_connection(&self, id: Uuid) -> Result<(), RemediationError> {
        self.tables.write().await.repository_connections.remove(&id);
        Ok(())
    }

    async fn upsert_workflow_run(
        &self,
        repository_connection_id: Uuid,
        provider_run_id: &str,
        delta: WorkflowRunDelta,
    ) -> (WorkflowRun, bool) {
        let mut tables = self.tables.write().await;
        let key = (repository_connection_id, provider_run_id.to_string());
        let now = Utc::now();

        match tables.workflow_runs.get(&key).cloned() {
            Some(existing) if existing.updated_at >= delta.event_updated_at => (existing, false),
            Some(mut existing) => {
                existing.status = delta.status;
                existing.conclusion = delta.conclusion;
                existing.branch = delta.branch;
                existing.commit_sha = delta.commit_sha;
                existing.commit_message = delta.commit_message;
                existing.author = delta.author;
                existing.run_url = delta.run_url;
                existing.event_payload = delta.event_payload;
                existing.updated_at = delta.event_updated_at;
                tables.workflow_runs.insert(key, existing.clone());
                (existing, true)
            }
            None => {
                let run = WorkflowRun {
                    id: Uuid::new_v4(),
                    repository_connection_id,
                    provider_run_id: provider_run_id.to_string(),
                    status: delta.status,
                    conclusion: delta.conclusion,
                    branch: delta.branch,
                    commit_sha: delta.commit_sha,
                    commit_message: delta.commit_message,
                    author: delta.author,
                    run_url: delta.run_url,
                    event_payload: delta.event_payload,
                    updated_at: delta.event_updated_at,
                    created_at: now,
                };
                tables.workflow_runs.insert(key, run.clone());
                (run, true)
            }
        }
    }

    async fn get_open_incident_for_workflow_run(&self, workflow_run_id: Uuid) -> Option<Incident> {
        self.tables
            .read()
            .await
            .incidents
            .values()
            .find(|i| i.workflow_run_id == Some(workflow_run_id) && i.status == IncidentStatus::Open)
            .cloned()
    }

    async fn get_incident(&self, incident_id: Uuid) -> Option<Incident> {
        self.tables.read().await.incidents.get(&incident_id).cloned()
    }

    async fn create_incident(&self, incident: Incident) -> Result<Incident, RemediationError> {
        let mut tables = self.tables.write().await;
        tables.incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn update_incident(&self, incident: Incident) -> Result<(), RemediationError> {
        let mut tables = self.tables.write().await;
        if !tables.incidents.contains_key(&incident.id) {
            return Err(RemediationError::InputRejected("no such incident".into()));
        }
        tables.incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn try_claim_remediation(&self, incident_id: Uuid) -> Result<bool, RemediationError> {
        let mut tables = self.tables.write().await;
        let incident = tables
            .incidents
            .get_mut(&incident_id)
            .ok_or_else(|| RemediationError::InputRejected("no such incident".into()))?;
        if incident.remediation_attempted_at.is_some() {
            return Ok(false);
        }
        incident.remediation_attempted_at = Some(Utc::now());
        incident.updated_at = Utc::now();
        Ok(true)
    }

    async fn create_pull_request_record(
        &self,
        record: PullRequestRecord,
    ) -> Result<(), RemediationError> {
        let mut tables = self.tables.write().await;
        tables.pull_request_records.insert(record.incident_id, record);
        Ok(())
    }

    async fn get_pull_request_record_for_incident(
        &self,
        incident_id: Uuid,
    ) -> Option<PullRequestRecord> {
        self.tables
            .read()
            .await
            .pull_request_records
            .get(&incident_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_incident(user_id: &str) -> Incident {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            repository_connection_id: None,
            workflow_run_id: None,
            severity: Severity::High,
            status: IncidentStatus::Open,
            source: "github".to_string(),
            failure_type: "build_failure".to_string(),
            error_message: "boom".to_string(),
            root_cause: None,
            confidence: None,
            remediation_attempted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_try_claim_remediation_is_at_most_once() {
        let store = InMemoryStore::new();
        let incident = mk_incident("u1");
        let id = incident.id;
        store.create_incident(incident).await.unwrap();

        let mut wins = 0;
        for _ in 0..8 {
            if store.try_claim_remediation(id).await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_upsert_workflow_run_is_idempotent_on_natural_key() {
        let store = InMemoryStore::new();
        let repo_conn_id = Uuid::new_v4();
        let delta = |updated_at: DateTime<Utc>, status: WorkflowStatus| WorkflowRunDelta {
            status,
            conclusion: Some("failure".to_string()),
            branch: "main".to_string(),
            commit_sha: "abc".to_string(),
            commit_message: "fix".to_string(),
            author: "octocat".to_string(),
            run_url: "https://example/run/42".to_string(),
            event_payload: serde_json::json!({}),
            event_updated_at: updated_at,
        };

        let t0 = Utc::now();
        let (run1, changed1) = store
            .upsert_workflow_run(repo_conn_id, "42", delta(t0, WorkflowStatus::Running))
            .await;
        assert!(changed1);

        let t_earlier = t0 - chrono::Duration::seconds(10);
        let (run2, changed2) = store
            .upsert_workflow_run(repo_conn_id, "42", delta(t_earlier, WorkflowStatus::Failed))
            .await;
        assert!(!changed2, "stale out-of-order delivery must not overwrite newer state");
        assert_eq!(run2.status, WorkflowStatus::Running);

        let t_later = t0 + chrono::Duration::seconds(10);
        let (run3, changed3) = store
            .upsert_workflow_run(repo_conn_id, "42", delta(t_later, WorkflowStatus::Failed))
            .await;
        assert!(changed3);
        assert_eq!(run3.status, WorkflowStatus::Failed);
        assert_eq!(run1.id, run3.id);
    }
}
