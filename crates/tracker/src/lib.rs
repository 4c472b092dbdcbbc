//! Workflow Tracker (C6): entry point for all verified webhook events.
//!
//! Grounded on `examples/5dlabs-cto/crates/healer/src/ci/tracker.rs`'s
//! `RemediationTracker`: an `Arc<RwLock<..>>`-backed (here, `Arc<dyn Store>`-backed)
//! state machine with a `handle_completion`-shaped entry point returning an action
//! enum (here [`TrackerOutcome`]), generalized from the reference's per-task
//! tracking to the spec's `remediation_attempted_at` at-most-once guard on
//! `Incident`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::{
    Incident, IncidentStatus, RemediationError, RepositoryConnection, Severity, Store,
    WorkflowRunDelta, WorkflowStatus,
};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Fields the tracker depends on from a `workflow_run`-family webhook delivery
/// (§6: "the tracker depends on the following fields; any absent field ->
/// ignored"). Construction of this struct from the raw payload (field presence
/// checking) is the caller's (ingest handler's) job; by the time it reaches the
/// tracker, all required fields are known present.
#[derive(Debug, Clone)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub provider_run_id: String,
    pub head_branch: String,
    pub head_sha: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub run_url: String,
    pub actor_login: String,
    pub head_commit_message: String,
    pub updated_at: DateTime<Utc>,
    pub raw_payload: Value,
}

#[derive(Debug, Clone)]
pub enum WebhookEvent {
    WorkflowRun(WorkflowRunEvent),
    /// `pull_request`, `push`, and merge-request analogues: persisted only as
    /// observability breadcrumbs (§4.6).
    Breadcrumb { event_type: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerOutcome {
    /// Payload was accepted but carried no actionable state change (stale/duplicate
    /// delivery, or a non-terminal status transition recorded for observability).
    Recorded { workflow_run_id: Uuid, changed: bool },
    /// A failed terminal transition opened (or reused) an incident, and this call
    /// won the at-most-once remediation claim — the caller must dispatch the
    /// orchestrator exactly once for `incident_id`.
    RemediationNeeded {
        incident_id: Uuid,
        workflow_run_id: Uuid,
    },
    /// A failed terminal transition occurred but remediation was not dispatched:
    /// either `auto_pr_enabled` is false, a successful PR already exists for this
    /// incident, or a concurrent delivery already won the claim.
    NoRemediationNeeded { workflow_run_id: Uuid },
    /// The event targeted a repository connection that no longer exists (e.g. a
    /// delivery racing a disconnect) — ignored without error (§8 boundary case).
    Ignored { reason: String },
}

pub struct WorkflowTracker {
    store: Arc<dyn Store>,
}

impl WorkflowTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn handle_event(
        &self,
        repository_connection_id: Uuid,
        event: WebhookEvent,
    ) -> Result<TrackerOutcome, RemediationError> {
        let Some(mut repo_conn) = self.store.get_repository_connection(repository_connection_id).await else {
            return Ok(TrackerOutcome::Ignored {
                reason: "repository connection no longer exists".to_string(),
            });
        };

        repo_conn.webhook_last_delivery_at = Some(Utc::now());
        self.store.update_repository_connection(repo_conn.clone()).await?;

        match event {
            WebhookEvent::Breadcrumb { event_type } => {
                info!(event_type, repository = %repo_conn.repository_full_name, "recorded observability breadcrumb");
                Ok(TrackerOutcome::Ignored {
                    reason: format!("breadcrumb event: {event_type}"),
                })
            }
            WebhookEvent::WorkflowRun(run_event) => self.handle_workflow_run(repo_conn, run_event).await,
        }
    }

    async fn handle_workflow_run(
        &self,
        repo_conn: RepositoryConnection,
        event: WorkflowRunEvent,
    ) -> Result<TrackerOutcome, RemediationError> {
        let status = map_status(&event.status, event.conclusion.as_deref());

        let delta = WorkflowRunDelta {
            status,
            conclusion: event.conclusion.clone(),
            branch: event.head_branch.clone(),
            commit_sha: event.head_sha.clone(),
            commit_message: event.head_commit_message.clone(),
            author: event.actor_login.clone(),
            run_url: event.run_url.clone(),
            event_payload: event.raw_payload.clone(),
            event_updated_at: event.updated_at,
        };

        let (run, changed) = self
            .store
            .upsert_workflow_run(repo_conn.id, &event.provider_run_id, delta)
            .await;

        if !changed || status != WorkflowStatus::Failed {
            return Ok(TrackerOutcome::Recorded {
                workflow_run_id: run.id,
                changed,
            });
        }

        let incident = match self.store.get_open_incident_for_workflow_run(run.id).await {
            Some(existing) => existing,
            None => {
                let severity = severity_for_failure(&repo_conn, &event.head_branch);
                let now = Utc::now();
                let incident = Incident {
                    id: Uuid::new_v4(),
                    user_id: repo_conn.user_id.clone(),
                    repository_connection_id: Some(repo_conn.id),
                    workflow_run_id: Some(run.id),
                    severity,
                    status: IncidentStatus::Open,
                    source: "github".to_string(),
                    failure_type: event.conclusion.clone().unwrap_or_else(|| "failure".to_string()),
                    error_message: format!(
                        "workflow run {} failed on {}",
                        event.provider_run_id, event.head_branch
                    ),
                    root_cause: None,
                    confidence: None,
                    remediation_attempted_at: None,
                    created_at: now,
                    updated_at: now,
                };
                self.store.create_incident(incident).await?
            }
        };

        if !repo_conn.auto_pr_enabled {
            return Ok(TrackerOutcome::NoRemediationNeeded {
                workflow_run_id: run.id,
            });
        }
        if self
            .store
            .get_pull_request_record_for_incident(incident.id)
            .await
            .is_some()
        {
            return Ok(TrackerOutcome::NoRemediationNeeded {
                workflow_run_id: run.id,
            });
        }

        if self.store.try_claim_remediation(incident.id).await? {
            Ok(TrackerOutcome::RemediationNeeded {
                incident_id: incident.id,
                workflow_run_id: run.id,
            })
        } else {
            Ok(TrackerOutcome::NoRemediationNeeded {
                workflow_run_id: run.id,
            })
        }
    }
}

fn map_status(status: &str, conclusion: Option<&str>) -> WorkflowStatus {
    match status {
        "completed" => match conclusion {
            Some("success") => WorkflowStatus::Success,
            Some("cancelled") => WorkflowStatus::Cancelled,
            _ => WorkflowStatus::Failed,
        },
        "in_progress" => WorkflowStatus::Running,
        _ => WorkflowStatus::Queued,
    }
}

fn severity_for_failure(repo_conn: &RepositoryConnection, branch: &str) -> Severity {
    if branch == repo_conn.default_branch {
        Severity::High
    } else {
        Severity::Medium
    }
}
