//! Webhook ingest (§6 "Ingest endpoints"): verify signature against the
//! `RepositoryConnection` identified by `repository.full_name`, then route to C6.
//! Mirrors `crates/healer/src/ci/server.rs`'s `ci_failure_handler` shape — parse,
//! validate, dispatch — but returns before remediation runs, since remediation is
//! always dispatched asynchronously (§5 "never dispatched inline").

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracker::{TrackerOutcome, WebhookEvent, WorkflowRunEvent};
use tracing::{info, warn};
use webhooks::verify_signature;

use crate::state::AppState;

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(payload): Result<Value, _> = serde_json::from_slice(&body) else {
        return StatusCode::BAD_REQUEST;
    };

    let Some(full_name) = payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(Value::as_str)
    else {
        return StatusCode::BAD_REQUEST;
    };

    let Some(repo_conn) = state.store.get_repository_connection_by_full_name(full_name).await else {
        info!(repository = full_name, "webhook for unconnected repository, ignored");
        return StatusCode::OK;
    };

    let Some(secret_ciphertext) = &repo_conn.encrypted_webhook_secret else {
        info!(repository = full_name, "webhook received before provisioning completed, ignored");
        return StatusCode::OK;
    };
    let Ok(secret) = state.vault.decrypt(secret_ciphertext) else {
        warn!(repository = full_name, "could not decrypt webhook secret");
        return StatusCode::OK;
    };

    let signature_header = signature_header_name(&provider);
    let Some(signature) = headers.get(signature_header).and_then(|v| v.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED;
    };
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    if !verify_signature(&body, signature, &secret) {
        warn!(repository = full_name, "webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event = match parse_event(&payload) {
        Some(event) => event,
        None => {
            info!(repository = full_name, "event carried no actionable fields, ignored");
            return StatusCode::OK;
        }
    };

    let outcome = match state.tracker.handle_event(repo_conn.id, event).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(repository = full_name, error = %err, "tracker failed, swallowing for provider retry semantics");
            return StatusCode::OK;
        }
    };

    if let TrackerOutcome::RemediationNeeded { incident_id, .. } = outcome {
        dispatch_remediation(state, incident_id);
    }

    StatusCode::OK
}

/// Spawns the orchestrator run on the runtime's thread pool, bounded by the
/// configured concurrency semaphore, without blocking the webhook response (§5).
fn dispatch_remediation(state: Arc<AppState>, incident_id: uuid::Uuid) {
    tokio::spawn(async move {
        let Ok(_permit) = state.remediation_semaphore.clone().acquire_owned().await else {
            warn!(%incident_id, "remediation semaphore closed, dropping dispatch");
            return;
        };
        match state.orchestrator.run(incident_id).await {
            Ok(outcome) => info!(%incident_id, ?outcome, "remediation run completed"),
            Err(err) => warn!(%incident_id, error = %err, "remediation run errored"),
        }
    });
}

fn signature_header_name(provider: &str) -> &'static str {
    match provider {
        "gitlab" => "x-gitlab-token",
        _ => "x-hub-signature-256",
    }
}

/// Parses a `workflow_run`-family event; any event missing a required field (§6:
/// "any absent field -> ignored") becomes `None`, which the caller surfaces as a
/// 2xx `Ignored` outcome rather than a 400 (the payload itself was well-formed).
fn parse_event(payload: &Value) -> Option<WebhookEvent> {
    let action = payload.get("action")?.as_str()?.to_string();

    let Some(run) = payload.get("workflow_run") else {
        let event_type = if payload.get("pull_request").is_some() {
            "pull_request"
        } else if payload.get("pushed_at").is_some() || payload.get("commits").is_some() {
            "push"
        } else {
            "unknown"
        };
        return Some(WebhookEvent::Breadcrumb {
            event_type: event_type.to_string(),
        });
    };

    let provider_run_id = run.get("id")?.as_u64()?.to_string();
    let head_branch = run.get("head_branch")?.as_str()?.to_string();
    let head_sha = run.get("head_sha")?.as_str()?.to_string();
    let status = run.get("status")?.as_str()?.to_string();
    let conclusion = run.get("conclusion").and_then(Value::as_str).map(str::to_string);
    let run_url = run.get("html_url")?.as_str()?.to_string();
    let actor_login = run
        .get("actor")
        .and_then(|a| a.get("login"))
        .and_then(Value::as_str)?
        .to_string();
    let head_commit_message = run
        .get("head_commit")
        .and_then(|c| c.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let updated_at = run
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(WebhookEvent::WorkflowRun(WorkflowRunEvent {
        action,
        provider_run_id,
        head_branch,
        head_sha,
        status,
        conclusion,
        run_url,
        actor_login,
        head_commit_message,
        updated_at,
        raw_payload: payload.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_header_name_prefers_provider_convention() {
        assert_eq!(signature_header_name("gitlab"), "x-gitlab-token");
        assert_eq!(signature_header_name("github"), "x-hub-signature-256");
        assert_eq!(signature_header_name("unknown"), "x-hub-signature-256");
    }

    #[test]
    fn test_parse_event_workflow_run_extracts_fields() {
        let payload = json!({
            "action": "completed",
            "workflow_run": {
                "id": 42,
                "head_branch": "main",
                "head_sha": "abc123",
                "status": "completed",
                "conclusion": "failure",
                "html_url": "https://github.com/acme/web/actions/runs/42",
                "actor": { "login": "octocat" },
                "head_commit": { "message": "fix typo" },
                "updated_at": "2026-01-01T00:00:00Z",
            },
        });

        let event = parse_event(&payload).expect("event should parse");
        match event {
            WebhookEvent::WorkflowRun(run) => {
                assert_eq!(run.provider_run_id, "42");
                assert_eq!(run.head_branch, "main");
                assert_eq!(run.conclusion.as_deref(), Some("failure"));
                assert_eq!(run.actor_login, "octocat");
            }
            other => panic!("expected WorkflowRun, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_event_missing_required_field_is_none() {
        let payload = json!({
            "action": "completed",
            "workflow_run": { "id": 42 },
        });
        assert!(parse_event(&payload).is_none());
    }

    #[test]
    fn test_parse_event_non_workflow_run_becomes_breadcrumb() {
        let payload = json!({ "action": "opened", "pull_request": { "number": 1 } });
        match parse_event(&payload) {
            Some(WebhookEvent::Breadcrumb { event_type }) => assert_eq!(event_type, "pull_request"),
            other => panic!("expected Breadcrumb, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_event_missing_action_is_none() {
        let payload = json!({ "workflow_run": { "id": 42 } });
        assert!(parse_event(&payload).is_none());
    }
}
