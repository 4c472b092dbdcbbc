//! Repository Connection Service (C8): thin coordinator delegating the webhook
//! sub-lifecycle to C4. Grounded on the reference's constructor-injected-capability
//! idiom (`ServerState::new()` in `crates/healer/src/ci/server.rs` taking its
//! collaborators by field) — this service takes `Arc<dyn Store>` and
//! `Arc<dyn WebhookManager>` and nothing more.

use std::sync::Arc;

use chrono::Utc;
use domain::{Principal, RemediationError, RepositoryConnection, Store, WebhookStatus};
use serde::Serialize;
use uuid::Uuid;
use webhooks::{default_events_for, WebhookManager};

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub auto_pr_enabled: bool,
    pub setup_webhook: bool,
    pub events: Option<Vec<String>>,
    pub default_branch: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_pr_enabled: false,
            setup_webhook: true,
            events: None,
            default_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectOutcome {
    pub webhook_deleted: bool,
}

pub struct RepositoryConnectionService {
    store: Arc<dyn Store>,
    webhook_manager: Arc<dyn WebhookManager>,
    provider_name: String,
}

impl RepositoryConnectionService {
    pub fn new(
        store: Arc<dyn Store>,
        webhook_manager: Arc<dyn WebhookManager>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            webhook_manager,
            provider_name: provider_name.into(),
        }
    }

    /// Creates the local record, then — if `setup_webhook` — delegates to C4. Both
    /// steps are transactional locally; a remote webhook-provisioning failure is
    /// reported via the returned record's `webhook_status` rather than aborting the
    /// connect (§4.8).
    pub async fn connect(
        &self,
        principal: &Principal,
        oauth_connection_id: Uuid,
        repository_full_name: &str,
        options: ConnectOptions,
    ) -> Result<RepositoryConnection, RemediationError> {
        let now = Utc::now();
        let conn = RepositoryConnection {
            id: Uuid::new_v4(),
            user_id: principal.clone(),
            repository_full_name: repository_full_name.to_string(),
            oauth_connection_id,
            webhook_id: None,
            encrypted_webhook_secret: None,
            webhook_url: None,
            events: options.events.unwrap_or_else(|| default_events_for(&self.provider_name)),
            webhook_status: WebhookStatus::NotProvisioned,
            auto_pr_enabled: options.auto_pr_enabled,
            is_enabled: true,
            default_branch: options.default_branch,
            webhook_last_delivery_at: None,
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.insert_repository_connection(conn).await?;

        if options.setup_webhook {
            return self.webhook_manager.install(saved.id).await;
        }
        Ok(saved)
    }

    /// Delegates to C4 first (best-effort), then removes the connection. The local
    /// record is always removed regardless of the remote call's outcome (§4.8, §8
    /// property 8: "webhook_id is null locally regardless of whether the remote call
    /// succeeded").
    pub async fn disconnect(
        &self,
        principal: &Principal,
        connection_id: Uuid,
        delete_webhook: bool,
    ) -> Result<DisconnectOutcome, RemediationError> {
        let conn = self
            .store
            .get_repository_connection(connection_id)
            .await
            .ok_or_else(|| RemediationError::InputRejected("no such repository connection".into()))?;
        if &conn.user_id != principal {
            return Err(RemediationError::AuthFailed(
                "repository connection does not belong to principal".into(),
            ));
        }

        let webhook_deleted = if delete_webhook && conn.webhook_id.is_some() {
            let removed = self.webhook_manager.remove(connection_id).await?;
            removed.webhook_id.is_none()
        } else {
            false
        };

        self.store.delete_repository_connection(connection_id).await?;
        Ok(DisconnectOutcome { webhook_deleted })
    }
}
