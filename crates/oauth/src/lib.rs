//! OAuth Coordinator (C3): authorization-code grant with CSRF-bound state, token
//! exchange, and revocation.
//!
//! No teacher file in the reference workspace implements OAuth2 end-to-end, so this
//! crate is hand-rolled directly against §4.3, reusing the reference's `reqwest`
//! client idiom (`crates/integrations/src/github_client.rs`) for the token exchange
//! and the `Arc<RwLock<HashMap<...>>>` transient-state pattern used by
//! `crates/healer/src/ci/tracker.rs` for the CSRF `state` store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::{OAuthConnection, RemediationError, Store};
use provider::{ProviderClient, ProviderError};
use rand::RngCore;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use vault::Vault;

const STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("oauth state missing, expired, or already used")]
    InvalidState,
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("failed to fetch provider user info: {0}")]
    UserInfoFailed(String),
    #[error("no active connection for principal/provider")]
    NotConnected,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] RemediationError),
}

/// Authorization-server endpoints and client credentials. Injected rather than
/// hardcoded so tests can point at a `wiremock` server.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub user_info_url: String,
}

struct PendingState {
    principal: String,
    provider: String,
    expires_at: DateTime<Utc>,
}

/// Summary returned to callers after a successful `complete()`. Never carries
/// tokens, plaintext or otherwise (§4.1: "decrypted material must not cross a
/// serialization boundary").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionSummary {
    pub connection_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DisconnectOutcome {
    pub revoked_remotely: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: serde_json::Value,
    login: Option<String>,
}

/// C3: drives `begin`/`complete`/`disconnect` against a single provider.
pub struct OAuthCoordinator {
    store: Arc<dyn Store>,
    vault: Vault,
    provider_client: Arc<dyn ProviderClient>,
    config: OAuthClientConfig,
    http: reqwest::Client,
    pending: Arc<RwLock<HashMap<String, PendingState>>>,
    provider_name: String,
}

impl OAuthCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Vault,
        provider_client: Arc<dyn ProviderClient>,
        provider_name: impl Into<String>,
        config: OAuthClientConfig,
    ) -> Self {
        Self {
            store,
            vault,
            provider_client,
            config,
            http: reqwest::Client::new(),
            pending: Arc::new(RwLock::new(HashMap::new())),
            provider_name: provider_name.into(),
        }
    }

    /// Generates a fresh, high-entropy CSRF `state`, stores it transiently bound to
    /// `principal` with a ≤10-minute TTL, and returns the authorization URL.
    pub async fn begin(&self, principal: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = hex::encode(bytes);

        self.pending.write().await.insert(
            state.clone(),
            PendingState {
                principal: principal.to_string(),
                provider: self.provider_name.clone(),
                expires_at: Utc::now() + Duration::minutes(STATE_TTL_MINUTES),
            },
        );

        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.authorize_url,
            urlencode(&self.config.client_id),
            urlencode(&self.config.redirect_uri),
            urlencode(&scopes),
            state
        )
    }

    /// Verifies `state` is present, unexpired, and single-use; exchanges `code` for
    /// tokens; fetches provider user info; encrypts and upserts the connection. A
    /// mismatched/expired state is a hard reject with no token exchange attempted. A
    /// successful exchange with a failed user-info fetch rolls back (no partial
    /// record is ever persisted).
    pub async fn complete(&self, code: &str, state: &str) -> Result<ConnectionSummary, OAuthError> {
        let principal = {
            let mut pending = self.pending.write().await;
            match pending.remove(state) {
                Some(p) if p.expires_at >= Utc::now() => p.principal,
                _ => return Err(OAuthError::InvalidState),
            }
        };

        let token = self.exchange_code(code).await?;
        let provider_user = self.fetch_user_info(&token.access_token).await?;

        let now = Utc::now();
        let encrypted_access_token = self
            .vault
            .encrypt(token.access_token.as_bytes())
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;
        let encrypted_refresh_token = token
            .refresh_token
            .as_ref()
            .map(|t| self.vault.encrypt(t.as_bytes()))
            .transpose()
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

        let scopes = token
            .scope
            .map(|s| s.split(|c| c == ' ' || c == ',').map(str::to_string).collect())
            .unwrap_or_else(|| self.config.scopes.clone());
        let expires_at = token.expires_in.map(|s| now + Duration::seconds(s));

        let conn = OAuthConnection {
            id: Uuid::new_v4(),
            user_id: principal,
            provider: self.provider_name.clone(),
            encrypted_access_token,
            encrypted_refresh_token,
            scopes,
            expires_at,
            provider_user_id: provider_user.id.to_string(),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        let saved = self.store.upsert_oauth_connection(conn).await?;

        info!(
            provider = %self.provider_name,
            provider_user_id = %saved.provider_user_id,
            "oauth connection established"
        );

        Ok(ConnectionSummary {
            connection_id: saved.id,
            provider: saved.provider,
            provider_user_id: saved.provider_user_id,
            scopes: saved.scopes,
            expires_at: saved.expires_at,
        })
    }

    /// Decrypts the token, calls the provider's `revoke_token`, then marks the local
    /// record revoked. Local revocation happens unconditionally even if the remote
    /// call fails (logged as a warning, never surfaced as the operation's failure —
    /// §4.3 "local-durable even if the remote call fails (idempotent with warning)").
    pub async fn disconnect(&self, principal: &str, provider: &str) -> Result<DisconnectOutcome, OAuthError> {
        let conn = self
            .store
            .get_active_oauth_connection(principal, provider)
            .await
            .ok_or(OAuthError::NotConnected)?;

        let token = self
            .vault
            .decrypt(&conn.encrypted_access_token)
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;
        let token = String::from_utf8_lossy(&token).to_string();

        let revoked_remotely = match self.provider_client.revoke_token(&token).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "remote token revocation failed, revoking locally anyway");
                false
            }
        };

        self.store.revoke_oauth_connection(conn.id).await?;

        Ok(DisconnectOutcome { revoked_remotely })
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            client_id: &'a str,
            client_secret: &'a str,
            code: &'a str,
            redirect_uri: &'a str,
        }
        let response = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&Body {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                code,
                redirect_uri: &self.config.redirect_uri,
            })
            .send()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::ExchangeFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ProviderUser, OAuthError> {
        let response = self
            .http
            .get(&self.config.user_info_url)
            .bearer_auth(access_token)
            .header("User-Agent", "remediation-service/1.0")
            .send()
            .await
            .map_err(|e| OAuthError::UserInfoFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::UserInfoFailed(format!(
                "user info endpoint returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfoFailed(e.to_string()))
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
