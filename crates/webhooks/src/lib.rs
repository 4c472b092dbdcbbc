//! Webhook Manager (C4): provisioning, deprovisioning, and signed-payload
//! verification, grounded directly on
//! `examples/5dlabs-cto/crates/integrations/src/webhooks.rs`'s
//! `verify_webhook_signature` (HMAC-SHA256, hex signature, constant-time compare),
//! carried over near-verbatim and generalized to take the secret as a parameter
//! instead of a hardcoded source.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{RemediationError, RepositoryConnection, Store, WebhookStatus};
use hmac::{Hmac, Mac};
use provider::ProviderClient;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;
use vault::Vault;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an HMAC-SHA256 webhook signature against the exact bytes received,
/// before any parsing or re-encoding (§4.4). `header_signature` is the hex-encoded
/// digest from the provider's signature header. Missing/malformed signatures or
/// secrets reject rather than panic.
#[must_use]
pub fn verify_signature(raw_body: &[u8], header_signature: &str, secret: &[u8]) -> bool {
    let Ok(signature_bytes) = hex::decode(header_signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Default subscribed events per provider family (§4.4).
#[must_use]
pub fn default_events_for(provider: &str) -> Vec<String> {
    match provider {
        "gitlab" => vec![
            "pipeline".to_string(),
            "merge_request".to_string(),
            "push".to_string(),
        ],
        _ => vec![
            "workflow_run".to_string(),
            "pull_request".to_string(),
            "push".to_string(),
        ],
    }
}

#[async_trait]
pub trait WebhookManager: Send + Sync {
    async fn install(&self, repository_connection_id: Uuid) -> Result<RepositoryConnection, RemediationError>;
    async fn remove(&self, repository_connection_id: Uuid) -> Result<RepositoryConnection, RemediationError>;
}

/// Default `WebhookManager`, delegating the actual HTTP calls to a
/// [`provider::ProviderClient`] rather than owning a `reqwest::Client` directly —
/// the reference's `github_client.rs` owns its own client because it has no
/// capability-trait seam; this crate is built against one (§9 Design Notes).
pub struct DefaultWebhookManager {
    store: Arc<dyn Store>,
    provider_client: Arc<dyn ProviderClient>,
    vault: Vault,
    ingest_base_url: String,
    provider_name: String,
}

impl DefaultWebhookManager {
    pub fn new(
        store: Arc<dyn Store>,
        provider_client: Arc<dyn ProviderClient>,
        vault: Vault,
        ingest_base_url: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider_client,
            vault,
            ingest_base_url: ingest_base_url.into(),
            provider_name: provider_name.into(),
        }
    }

    async fn token_for(&self, conn: &RepositoryConnection) -> Result<String, RemediationError> {
        let oauth = self
            .store
            .get_oauth_connection_by_id(conn.oauth_connection_id)
            .await
            .ok_or_else(|| RemediationError::AuthFailed("no oauth connection for repository".into()))?;
        let decrypted = self
            .vault
            .decrypt(&oauth.encrypted_access_token)
            .map_err(|e| RemediationError::Fatal(e.to_string()))?;
        Ok(String::from_utf8_lossy(&decrypted).to_string())
    }
}

#[async_trait]
impl WebhookManager for DefaultWebhookManager {
    /// Generates a fresh high-entropy secret, provisions a hook on the code host,
    /// and persists the result. If the provider call fails, `webhook_status` becomes
    /// `failed` with no secret stored; the repository connection remains usable but
    /// dormant rather than erroring out the whole connect flow (§4.4).
    async fn install(&self, repository_connection_id: Uuid) -> Result<RepositoryConnection, RemediationError> {
        let mut conn = self
            .store
            .get_repository_connection(repository_connection_id)
            .await
            .ok_or_else(|| RemediationError::InputRejected("no such repository connection".into()))?;

        let (owner, repo) = split_full_name(&conn.repository_full_name)?;
        let token = self.token_for(&conn).await?;

        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);
        let url = format!("{}/webhooks/{}", self.ingest_base_url, self.provider_name);

        match self
            .provider_client
            .create_webhook(&token, owner, repo, &url, &secret, &conn.events)
            .await
        {
            Ok(hook) => {
                let encrypted = self
                    .vault
                    .encrypt(secret.as_bytes())
                    .map_err(|e| RemediationError::Fatal(e.to_string()))?;
                conn.webhook_id = Some(hook.id);
                conn.encrypted_webhook_secret = Some(encrypted);
                conn.webhook_url = Some(url);
                conn.webhook_status = WebhookStatus::Active;
                conn.updated_at = Utc::now();
                debug!(owner, repo, hook_id = hook.id, "webhook installed");
            }
            Err(err) => {
                warn!(owner, repo, error = %err, "webhook provisioning failed, repository connection dormant");
                conn.webhook_status = WebhookStatus::Failed;
                conn.encrypted_webhook_secret = None;
                conn.updated_at = Utc::now();
            }
        }

        self.store.update_repository_connection(conn.clone()).await?;
        Ok(conn)
    }

    /// Calls `delete_webhook` best-effort, then unconditionally clears local webhook
    /// fields. Local clearing never depends on remote success (§4.4, §8 property 8).
    async fn remove(&self, repository_connection_id: Uuid) -> Result<RepositoryConnection, RemediationError> {
        let mut conn = self
            .store
            .get_repository_connection(repository_connection_id)
            .await
            .ok_or_else(|| RemediationError::InputRejected("no such repository connection".into()))?;

        if let Some(hook_id) = conn.webhook_id {
            if let Ok((owner, repo)) = split_full_name(&conn.repository_full_name) {
                if let Ok(token) = self.token_for(&conn).await {
                    if let Err(err) = self.provider_client.delete_webhook(&token, owner, repo, hook_id).await {
                        warn!(hook_id, error = %err, "remote webhook deletion failed, clearing locally anyway");
                    }
                }
            }
        }

        conn.clear_webhook();
        conn.updated_at = Utc::now();
        self.store.update_repository_connection(conn.clone()).await?;
        Ok(conn)
    }
}

fn split_full_name(full_name: &str) -> Result<(&str, &str), RemediationError> {
    full_name
        .split_once('/')
        .ok_or_else(|| RemediationError::InputRejected(format!("malformed repository full name: {full_name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_signature_valid() {
        let secret = b"s3cr3t";
        let body = b"{\"action\":\"completed\"}";
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(body, &sig, secret));
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let body = b"payload";
        let mut mac = HmacSha256::new_from_slice(b"right-secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(!verify_signature(body, &sig, b"wrong-secret"));
    }

    #[test]
    fn test_verify_signature_rejects_malformed_hex() {
        assert!(!verify_signature(b"payload", "not-hex!!", b"secret"));
    }

    #[test]
    fn test_verify_signature_rejects_tampered_body() {
        let secret = b"s3cr3t";
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(b"original");
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(!verify_signature(b"tampered", &sig, secret));
    }

    #[test]
    fn test_default_events_per_provider_family() {
        assert_eq!(
            default_events_for("github"),
            vec!["workflow_run", "pull_request", "push"]
        );
        assert_eq!(
            default_events_for("gitlab"),
            vec!["pipeline", "merge_request", "push"]
        );
    }

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name("acme/web").unwrap(), ("acme", "web"));
        assert!(split_full_name("acme-web").is_err());
    }
}
