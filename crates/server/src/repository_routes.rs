//! Repository endpoints (§6): `list_available`, `connect`, `list_connections`,
//! `get_connection`, `update_connection`, `disconnect`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use connections::ConnectOptions;
use domain::{RepositoryConnection, WebhookStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

fn principal_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-principal-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Connection view safe for the wire: never the encrypted webhook secret (same
/// "never serialize the ciphertext envelope" rule `oauth_routes::ConnectionListItem`
/// applies to OAuth connections).
#[derive(Debug, Serialize)]
struct RepositoryConnectionView {
    id: Uuid,
    repository_full_name: String,
    webhook_status: WebhookStatus,
    events: Vec<String>,
    auto_pr_enabled: bool,
    is_enabled: bool,
    default_branch: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RepositoryConnection> for RepositoryConnectionView {
    fn from(conn: RepositoryConnection) -> Self {
        Self {
            id: conn.id,
            repository_full_name: conn.repository_full_name,
            webhook_status: conn.webhook_status,
            events: conn.events,
            auto_pr_enabled: conn.auto_pr_enabled,
            is_enabled: conn.is_enabled,
            default_branch: conn.default_branch,
            created_at: conn.created_at,
            updated_at: conn.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListAvailableQuery {
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

/// `list_available(principal, {sort, page})`: repositories the principal's active
/// OAuth token can see but has not necessarily connected yet.
pub async fn list_available(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListAvailableQuery>,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(Vec::<provider::RepositorySummary>::new())).into_response();
    };
    let Some(oauth_conn) = state.store.get_active_oauth_connection(&principal, "github").await else {
        return (StatusCode::OK, Json(Vec::<provider::RepositorySummary>::new())).into_response();
    };
    let Ok(token_bytes) = state.vault.decrypt(&oauth_conn.encrypted_access_token) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(Vec::<provider::RepositorySummary>::new())).into_response();
    };
    let token = String::from_utf8_lossy(&token_bytes).to_string();

    match state.provider_client.list_repositories(&token, query.page).await {
        Ok(mut repos) => {
            if query.sort.as_deref() == Some("name") {
                repos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
            }
            (StatusCode::OK, Json(repos)).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "list_repositories failed");
            (StatusCode::BAD_GATEWAY, Json(Vec::<provider::RepositorySummary>::new())).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub full_name: String,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub auto_pr_enabled: bool,
    #[serde(default = "default_true")]
    pub setup_webhook: bool,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConnectRequest>,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(oauth_conn) = state.store.get_active_oauth_connection(&principal, "github").await else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "no active oauth connection"}))).into_response();
    };

    let options = ConnectOptions {
        auto_pr_enabled: request.auto_pr_enabled,
        setup_webhook: request.setup_webhook,
        events: request.events,
        default_branch: request.default_branch,
    };

    match state
        .connections
        .connect(&principal, oauth_conn.id, &request.full_name, options)
        .await
    {
        Ok(conn) => (StatusCode::CREATED, Json(RepositoryConnectionView::from(conn))).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "connect repository failed");
            (StatusCode::CONFLICT, Json(serde_json::json!({"error": err.to_string()}))).into_response()
        }
    }
}

pub async fn list_connections(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(Vec::<RepositoryConnectionView>::new())).into_response();
    };
    let connections = state.store.list_repository_connections(&principal).await;
    let views: Vec<RepositoryConnectionView> = connections.into_iter().map(RepositoryConnectionView::from).collect();
    (StatusCode::OK, Json(views)).into_response()
}

pub async fn get_connection(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_repository_connection(id).await {
        Some(conn) => (StatusCode::OK, Json(RepositoryConnectionView::from(conn))).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub auto_pr_enabled: Option<bool>,
    pub is_enabled: Option<bool>,
    pub default_branch: Option<String>,
}

pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateConnectionRequest>,
) -> impl IntoResponse {
    let Some(mut conn) = state.store.get_repository_connection(id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(v) = patch.auto_pr_enabled {
        conn.auto_pr_enabled = v;
    }
    if let Some(v) = patch.is_enabled {
        conn.is_enabled = v;
    }
    if let Some(v) = patch.default_branch {
        conn.default_branch = v;
    }
    conn.updated_at = chrono::Utc::now();

    match state.store.update_repository_connection(conn.clone()).await {
        Ok(()) => (StatusCode::OK, Json(RepositoryConnectionView::from(conn))).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DisconnectQuery {
    #[serde(default = "default_true")]
    pub delete_webhook: bool,
}

#[derive(Debug, Serialize)]
struct DisconnectResponse {
    webhook_deleted: bool,
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<DisconnectQuery>,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.connections.disconnect(&principal, id, query.delete_webhook).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(DisconnectResponse {
                webhook_deleted: outcome.webhook_deleted,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "disconnect repository failed");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": err.to_string()}))).into_response()
        }
    }
}
