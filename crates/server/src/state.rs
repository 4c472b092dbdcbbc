//! Shared application state (§6 "AMBIENT — HTTP layer"), built once at startup and
//! handed to every handler via `axum::extract::State`.

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use connections::RepositoryConnectionService;
use domain::{InMemoryStore, Store};
use oauth::{OAuthClientConfig, OAuthCoordinator};
use orchestrator::{MockPatchModel, Orchestrator, OrchestratorConfig, PatchModel};
use provider::{GithubClient, ProviderClient};
use tokio::sync::Semaphore;
use tracker::WorkflowTracker;
use vault::Vault;
use webhooks::{DefaultWebhookManager, WebhookManager};

pub const PROVIDER_NAME: &str = "github";

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub vault: Vault,
    pub provider_client: Arc<dyn ProviderClient>,
    pub webhook_manager: Arc<dyn WebhookManager>,
    pub tracker: Arc<WorkflowTracker>,
    pub oauth: Arc<OAuthCoordinator>,
    pub connections: Arc<RepositoryConnectionService>,
    pub orchestrator: Arc<Orchestrator>,
    /// Bounds concurrent orchestrator runs (§5 "bounded worker pool").
    pub remediation_semaphore: Arc<Semaphore>,
    pub config: Config,
}

impl AppState {
    /// Builds the full dependency graph from configuration. A missing or malformed
    /// `token_encryption_key` is fatal here (§4.1), aborting process startup.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let key = config
            .token_encryption_key
            .as_deref()
            .context("TOKEN_ENCRYPTION_KEY is required to start the remediation service")?;
        let vault = Vault::new(config.token_encryption_key_id.clone(), key)
            .map_err(|e| anyhow::anyhow!("invalid token_encryption_key: {e}"))?;

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let provider_client: Arc<dyn ProviderClient> =
            Arc::new(GithubClient::new().context("failed to build GitHub client")?);

        let webhook_manager: Arc<dyn WebhookManager> = Arc::new(DefaultWebhookManager::new(
            store.clone(),
            provider_client.clone(),
            vault.clone(),
            config.ingest_base_url.clone(),
            PROVIDER_NAME,
        ));

        let tracker = Arc::new(WorkflowTracker::new(store.clone()));

        let oauth_config = OAuthClientConfig {
            client_id: config.oauth_client_id.clone(),
            client_secret: config.oauth_client_secret.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
            scopes: config.oauth_scopes.clone(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_info_url: "https://api.github.com/user".to_string(),
        };
        let oauth = Arc::new(OAuthCoordinator::new(
            store.clone(),
            vault.clone(),
            provider_client.clone(),
            PROVIDER_NAME,
            oauth_config,
        ));

        let connections = Arc::new(RepositoryConnectionService::new(
            store.clone(),
            webhook_manager.clone(),
            PROVIDER_NAME,
        ));

        let patch_model: Arc<dyn PatchModel> = Arc::new(MockPatchModel);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            vault.clone(),
            provider_client.clone(),
            patch_model,
            OrchestratorConfig {
                max_files_per_pr: config.max_files_per_pr,
                max_errors_per_file: config.max_errors_per_file,
                max_log_context_chars: config.max_log_context_chars,
                remediation_deadline_s: config.remediation_deadline_s,
            },
        ));

        let remediation_semaphore = Arc::new(Semaphore::new(config.remediation_worker_concurrency));

        Ok(Arc::new(Self {
            store,
            vault,
            provider_client,
            webhook_manager,
            tracker,
            oauth,
            connections,
            orchestrator,
            remediation_semaphore,
            config,
        }))
    }
}
