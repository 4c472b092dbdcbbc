//! Remediation Orchestrator (C7): drives, for a single incident,
//! `resolve credentials -> fetch logs -> parse -> select -> patch -> branch -> commit -> PR`.
//!
//! Grounded on `examples/5dlabs-cto/crates/healer/src/ci/context.rs`'s fault-tolerant
//! multi-source gathering — each step wrapped so a failure yields a typed terminal
//! outcome rather than unwinding — reused here as the shape of the seven-step
//! pipeline below.

mod model;
mod patch;
mod select;

pub use model::{ChangeKind, LineChange, MockPatchModel, ModelError, PatchModel, PatchRequest, PatchResponse};
pub use patch::{apply_changes, validate_changes, PatchError};
pub use select::{select_candidates, FileCandidate};

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::Engine;
use chrono::Utc;
use domain::{
    Incident, IncidentStatus, PullRequestRecord, PullRequestState, RemediationError, Store,
};
use provider::{CreateOrUpdateFile, CreatePullRequest, ProviderClient, ProviderError};
use tracing::{info, warn};
use uuid::Uuid;
use vault::Vault;

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorOutcome {
    /// A pull request was opened and the incident moved to `investigating`.
    Remediated { pr_number: u64, pr_url: String },
    /// The pipeline stopped at a named step; the incident carries the reason via
    /// `RemediationError::incident_failure_reason`.
    Failed { reason: &'static str },
}

pub struct OrchestratorConfig {
    pub max_files_per_pr: usize,
    pub max_errors_per_file: usize,
    pub max_log_context_chars: usize,
    pub remediation_deadline_s: u64,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    vault: Vault,
    provider_client: Arc<dyn ProviderClient>,
    patch_model: Arc<dyn PatchModel>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Vault,
        provider_client: Arc<dyn ProviderClient>,
        patch_model: Arc<dyn PatchModel>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            vault,
            provider_client,
            patch_model,
            config,
        }
    }

    /// Runs the full pipeline for `incident_id`. The deadline from
    /// `OrchestratorConfig::remediation_deadline_s` wraps the whole call (§5
    /// "Remediation tasks carry an overall deadline"); on expiry the incident is
    /// transitioned to `failed_timeout` and `Ok(Failed { reason: "failed_timeout" })`
    /// is returned rather than propagating an error, since a timeout is itself a
    /// terminal (not exceptional) pipeline outcome.
    pub async fn run(&self, incident_id: Uuid) -> Result<OrchestratorOutcome, RemediationError> {
        let deadline = StdDuration::from_secs(self.config.remediation_deadline_s);
        match tokio::time::timeout(deadline, self.run_inner(incident_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%incident_id, "remediation exceeded deadline");
                self.fail_incident(incident_id, "failed_timeout").await?;
                Ok(OrchestratorOutcome::Failed { reason: "failed_timeout" })
            }
        }
    }

    async fn run_inner(&self, incident_id: Uuid) -> Result<OrchestratorOutcome, RemediationError> {
        let incident = self.load_incident(incident_id).await?;

        let repository_connection_id = incident.repository_connection_id.ok_or_else(|| {
            RemediationError::InputRejected("incident has no repository connection".to_string())
        })?;
        let repo_conn = self
            .store
            .get_repository_connection(repository_connection_id)
            .await
            .ok_or_else(|| RemediationError::InputRejected("repository connection no longer exists".to_string()))?;

        let Some((owner, repo)) = split_full_name(&repo_conn.repository_full_name) else {
            return self.terminal(incident_id, "failed_input_rejected").await;
        };

        // Step 1: resolve credentials.
        let oauth_conn = match self.store.get_active_oauth_connection(&incident.user_id, "github").await {
            Some(conn) => conn,
            None => return self.terminal(incident_id, "failed_no_credentials").await,
        };
        let token = match self.vault.decrypt(&oauth_conn.encrypted_access_token) {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|_| RemediationError::Fatal("decrypted token is not valid UTF-8".to_string()))?,
            Err(_) => return self.terminal(incident_id, "failed_no_credentials").await,
        };

        if incident.workflow_run_id.is_none() {
            return self.terminal(incident_id, "failed_input_rejected").await;
        }
        let Some(run_id_numeric) = workflow_run_id_as_provider_ref(&incident) else {
            return self.terminal(incident_id, "failed_input_rejected").await;
        };

        // Resolve the failing run's commit context (§4.7 step 5a/6a/6b: patch and
        // branch off the run's own commit, not blindly off the default branch).
        let run_info = match self
            .provider_client
            .get_workflow_run(&token, owner, repo, run_id_numeric)
            .await
        {
            Ok(info) => info,
            Err(_) => return self.terminal(incident_id, "failed_provider").await,
        };
        let commit_branch = if run_info.head_branch.is_empty() {
            repo_conn.default_branch.clone()
        } else {
            run_info.head_branch.clone()
        };
        let commit_sha = run_info.head_sha.clone();

        // Step 2: fetch logs.
        let logs = match self
            .provider_client
            .download_run_logs(&token, owner, repo, run_id_numeric)
            .await
        {
            Ok(bytes) => bytes,
            Err(_) => return self.terminal(incident_id, "failed_no_logs").await,
        };
        let log_text = String::from_utf8_lossy(&logs).into_owned();

        // Step 3: parse errors.
        let blocks = logparser::parse(&log_text);
        if blocks.is_empty() {
            return self.terminal(incident_id, "failed_no_signal").await;
        }

        // Step 4: select candidates.
        let candidates = select_candidates(blocks, self.config.max_files_per_pr, self.config.max_errors_per_file);
        if candidates.is_empty() {
            return self.terminal(incident_id, "failed_no_signal").await;
        }

        let branch = format!("remediation/{incident_id}");
        let base_branch = commit_branch;

        // Step 5: patch each candidate file.
        let mut file_shas = Vec::new();
        let mut rationales = Vec::new();
        for candidate in &candidates {
            let Ok(file) = self
                .provider_client
                .get_file(&token, owner, repo, &candidate.file, Some(&base_branch))
                .await
            else {
                // §4.7 step 7: partial failure does not abort the whole PR; skip this file.
                continue;
            };

            let content = match base64::engine::general_purpose::STANDARD.decode(file.content.replace('\n', "")) {
                Ok(raw) => match String::from_utf8(raw) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Err(_) => continue,
            };

            let truncated_blocks: Vec<logparser::ErrorBlock> = candidate
                .blocks
                .iter()
                .cloned()
                .map(|mut b| {
                    if b.message.len() > self.config.max_log_context_chars {
                        b.message.truncate(self.config.max_log_context_chars);
                    }
                    b
                })
                .collect();

            let request = PatchRequest {
                repository: repo_conn.repository_full_name.clone(),
                workflow: incident.failure_type.clone(),
                file_path: candidate.file.clone(),
                file_content: content.clone(),
                error_blocks: truncated_blocks,
            };

            let response = match self.patch_model.generate_patch(request).await {
                Ok(r) => r,
                Err(_) => continue,
            };

            let line_count = content.lines().count();
            if validate_changes(&response.changes, line_count).is_err() {
                continue;
            }

            let patched = apply_changes(&content, &response.changes);
            let encoded = base64::engine::general_purpose::STANDARD.encode(patched.as_bytes());

            file_shas.push((candidate.file.clone(), encoded, file.sha));
            rationales.push(format!("- `{}`: {}", candidate.file, response.rationale));
        }

        if file_shas.is_empty() {
            return self.terminal(incident_id, "failed_no_signal").await;
        }

        // Step 6: open PR.
        if self
            .provider_client
            .create_branch(&token, owner, repo, &commit_sha, &branch)
            .await
            .is_err()
        {
            return self.terminal(incident_id, "failed_provider").await;
        }

        for (path, content_base64, sha) in &file_shas {
            let message = format!("Remediate {path} (incident {incident_id})");
            let _ = self
                .provider_client
                .create_or_update_file(
                    &token,
                    owner,
                    repo,
                    path,
                    CreateOrUpdateFile {
                        content_base64,
                        sha: Some(sha.as_str()),
                        branch: &branch,
                        message: &message,
                    },
                )
                .await;
        }

        let title = format!("Automated remediation for incident {incident_id}");
        let body = format!(
            "Automated fix for failing CI.\n\nIncident: {incident_id}\n\n{}\n\n**This PR was machine-generated. Review before merge.**",
            rationales.join("\n")
        );

        let created = match self
            .provider_client
            .create_pull_request(
                &token,
                owner,
                repo,
                CreatePullRequest {
                    head: &branch,
                    base: &base_branch,
                    title: &title,
                    body: &body,
                    draft: false,
                },
            )
            .await
        {
            Ok(pr) => pr,
            Err(_) => return self.terminal(incident_id, "failed_provider").await,
        };

        // Step 7: record outcome.
        self.store
            .create_pull_request_record(PullRequestRecord {
                incident_id,
                pr_number: created.number,
                pr_url: created.html_url.clone(),
                branch_name: branch,
                state: PullRequestState::Open,
                created_at: Utc::now(),
            })
            .await?;

        let mut incident = incident;
        incident.status = IncidentStatus::Investigating;
        incident.updated_at = Utc::now();
        self.store.update_incident(incident).await?;

        info!(%incident_id, pr_number = created.number, "remediation PR opened");
        Ok(OrchestratorOutcome::Remediated {
            pr_number: created.number,
            pr_url: created.html_url,
        })
    }

    async fn load_incident(&self, incident_id: Uuid) -> Result<Incident, RemediationError> {
        self.store
            .get_incident(incident_id)
            .await
            .ok_or_else(|| RemediationError::InputRejected("no such incident".to_string()))
    }

    async fn terminal(&self, incident_id: Uuid, reason: &'static str) -> Result<OrchestratorOutcome, RemediationError> {
        self.fail_incident(incident_id, reason).await?;
        Ok(OrchestratorOutcome::Failed { reason })
    }

    async fn fail_incident(&self, incident_id: Uuid, reason: &'static str) -> Result<(), RemediationError> {
        if let Some(mut incident) = self.store.get_incident(incident_id).await {
            incident.root_cause = Some(reason.to_string());
            incident.updated_at = Utc::now();
            self.store.update_incident(incident).await?;
        }
        Ok(())
    }
}

fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    full_name.split_once('/')
}

/// The incident's `error_message` carries the provider run id as its last
/// whitespace-delimited token (set by C6 in `handle_workflow_run`); parsed back out
/// here since `download_run_logs`/`get_workflow_run` are keyed by numeric run id.
fn workflow_run_id_as_provider_ref(incident: &Incident) -> Option<u64> {
    incident
        .error_message
        .split_whitespace()
        .find_map(|tok| tok.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{InMemoryStore, OAuthConnection, RepositoryConnection, Severity, WebhookStatus};
    use provider::{CreatedPullRequest, CreatedWebhook, FileContent, RepositorySummary, WorkflowRunInfo};

    struct StubProvider {
        logs: Vec<u8>,
        file_content_b64: String,
        head_branch: String,
        head_sha: String,
        get_file_ref: std::sync::Mutex<Option<String>>,
        create_branch_from_sha: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        async fn list_repositories(&self, _token: &str, _page: u32) -> Result<Vec<RepositorySummary>, ProviderError> {
            Ok(vec![])
        }
        async fn get_file(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _path: &str,
            git_ref: Option<&str>,
        ) -> Result<FileContent, ProviderError> {
            *self.get_file_ref.lock().unwrap() = git_ref.map(str::to_string);
            Ok(FileContent {
                content: self.file_content_b64.clone(),
                sha: "blobsha".to_string(),
                encoding: "base64".to_string(),
            })
        }
        async fn create_or_update_file(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _path: &str,
            _req: CreateOrUpdateFile<'_>,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn create_branch(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            from_sha: &str,
            _name: &str,
        ) -> Result<(), ProviderError> {
            *self.create_branch_from_sha.lock().unwrap() = Some(from_sha.to_string());
            Ok(())
        }
        async fn create_pull_request(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _req: CreatePullRequest<'_>,
        ) -> Result<CreatedPullRequest, ProviderError> {
            Ok(CreatedPullRequest {
                number: 7,
                html_url: "https://github.com/acme/web/pull/7".to_string(),
            })
        }
        async fn create_webhook(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _url: &str,
            _secret: &str,
            _events: &[String],
        ) -> Result<CreatedWebhook, ProviderError> {
            unimplemented!()
        }
        async fn delete_webhook(&self, _token: &str, _owner: &str, _repo: &str, _hook_id: u64) -> Result<(), ProviderError> {
            unimplemented!()
        }
        async fn get_workflow_run(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            run_id: u64,
        ) -> Result<WorkflowRunInfo, ProviderError> {
            Ok(WorkflowRunInfo {
                id: run_id,
                status: "completed".to_string(),
                conclusion: Some("failure".to_string()),
                head_branch: self.head_branch.clone(),
                head_sha: self.head_sha.clone(),
            })
        }
        async fn download_run_logs(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _run_id: u64,
        ) -> Result<Vec<u8>, ProviderError> {
            Ok(self.logs.clone())
        }
        async fn rerun_workflow(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            _run_id: u64,
            _failed_only: bool,
        ) -> Result<(), ProviderError> {
            unimplemented!()
        }
        async fn revoke_token(&self, _token: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn test_vault() -> Vault {
        Vault::new("k1", "01234567890123456789012345678901").unwrap()
    }

    async fn setup(store: &Arc<dyn Store>, vault: &Vault) -> (RepositoryConnection, Incident) {
        let now = Utc::now();
        let oauth_conn = OAuthConnection {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            provider: "github".to_string(),
            encrypted_access_token: vault.encrypt(b"gh-token").unwrap(),
            encrypted_refresh_token: None,
            scopes: vec!["repo".to_string()],
            expires_at: None,
            provider_user_id: "1".to_string(),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_oauth_connection(oauth_conn).await.unwrap();

        let repo_conn = RepositoryConnection {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            repository_full_name: "acme/web".to_string(),
            oauth_connection_id: Uuid::new_v4(),
            webhook_id: Some(1),
            encrypted_webhook_secret: None,
            webhook_url: None,
            events: vec![],
            webhook_status: WebhookStatus::Active,
            auto_pr_enabled: true,
            is_enabled: true,
            default_branch: "main".to_string(),
            webhook_last_delivery_at: None,
            created_at: now,
            updated_at: now,
        };
        let repo_conn = store.insert_repository_connection(repo_conn).await.unwrap();

        let incident = Incident {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            repository_connection_id: Some(repo_conn.id),
            workflow_run_id: Some(Uuid::new_v4()),
            severity: Severity::High,
            status: IncidentStatus::Open,
            source: "github".to_string(),
            failure_type: "build_failure".to_string(),
            error_message: "workflow run 42 failed on main".to_string(),
            root_cause: None,
            confidence: None,
            remediation_attempted_at: None,
            created_at: now,
            updated_at: now,
        };
        let incident = store.create_incident(incident).await.unwrap();
        (repo_conn, incident)
    }

    #[tokio::test]
    async fn test_successful_remediation_opens_pr_and_moves_incident_to_investigating() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let vault = test_vault();
        let (_repo_conn, incident) = setup(&store, &vault).await;

        let file_b64 = base64::engine::general_purpose::STANDARD.encode("import x;\nconst a = 1;\n");
        let logs = b"src/app.ts:2:7: error: 'a' is declared but never used\n".to_vec();
        let provider_client = Arc::new(StubProvider {
            logs,
            file_content_b64: file_b64,
            head_branch: "feature/x".to_string(),
            head_sha: "a".repeat(40),
            get_file_ref: std::sync::Mutex::new(None),
            create_branch_from_sha: std::sync::Mutex::new(None),
        });

        let orchestrator = Orchestrator::new(
            store.clone(),
            vault,
            provider_client.clone(),
            Arc::new(MockPatchModel),
            OrchestratorConfig {
                max_files_per_pr: 3,
                max_errors_per_file: 5,
                max_log_context_chars: 4000,
                remediation_deadline_s: 30,
            },
        );

        let outcome = orchestrator.run(incident.id).await.unwrap();
        match outcome {
            OrchestratorOutcome::Remediated { pr_number, .. } => assert_eq!(pr_number, 7),
            other => panic!("expected Remediated, got {other:?}"),
        }

        let record = store.get_pull_request_record_for_incident(incident.id).await;
        assert!(record.is_some());

        assert_eq!(
            provider_client.get_file_ref.lock().unwrap().as_deref(),
            Some("feature/x"),
            "file content must be read from the run's own commit branch, not the default branch"
        );
        assert_eq!(
            provider_client.create_branch_from_sha.lock().unwrap().as_deref(),
            Some("a".repeat(40).as_str()),
            "the remediation branch must fork from the run's head commit SHA, not a branch name"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_fails_without_pr() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let vault = test_vault();
        let now = Utc::now();
        let repo_conn = RepositoryConnection {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            repository_full_name: "acme/web".to_string(),
            oauth_connection_id: Uuid::new_v4(),
            webhook_id: None,
            encrypted_webhook_secret: None,
            webhook_url: None,
            events: vec![],
            webhook_status: WebhookStatus::NotProvisioned,
            auto_pr_enabled: true,
            is_enabled: true,
            default_branch: "main".to_string(),
            webhook_last_delivery_at: None,
            created_at: now,
            updated_at: now,
        };
        let repo_conn = store.insert_repository_connection(repo_conn).await.unwrap();
        let incident = Incident {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            repository_connection_id: Some(repo_conn.id),
            workflow_run_id: Some(Uuid::new_v4()),
            severity: Severity::High,
            status: IncidentStatus::Open,
            source: "github".to_string(),
            failure_type: "build_failure".to_string(),
            error_message: "workflow run 1 failed on main".to_string(),
            root_cause: None,
            confidence: None,
            remediation_attempted_at: None,
            created_at: now,
            updated_at: now,
        };
        let incident = store.create_incident(incident).await.unwrap();

        let provider_client: Arc<dyn ProviderClient> = Arc::new(StubProvider {
            logs: vec![],
            file_content_b64: String::new(),
            head_branch: String::new(),
            head_sha: String::new(),
            get_file_ref: std::sync::Mutex::new(None),
            create_branch_from_sha: std::sync::Mutex::new(None),
        });
        let orchestrator = Orchestrator::new(
            store,
            vault,
            provider_client,
            Arc::new(MockPatchModel),
            OrchestratorConfig {
                max_files_per_pr: 3,
                max_errors_per_file: 5,
                max_log_context_chars: 4000,
                remediation_deadline_s: 30,
            },
        );

        let outcome = orchestrator.run(incident.id).await.unwrap();
        assert_eq!(outcome, OrchestratorOutcome::Failed { reason: "failed_no_credentials" });
    }
}
