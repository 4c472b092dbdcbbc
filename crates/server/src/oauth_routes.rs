//! OAuth endpoints (§6): `begin_authorize`, `callback`, `disconnect`, `list_connections`.
//! Identity/session issuance is out of scope (spec §1: "the core consumes a
//! validated principal"); the caller supplies the already-validated principal via
//! the `x-principal-id` header, the same "caller already authenticated" boundary
//! the reference assumes for its Kubernetes-native callers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

fn principal_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-principal-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Serialize)]
struct AuthorizeResponse {
    authorization_url: String,
}

pub async fn begin_authorize(
    State(state): State<Arc<AppState>>,
    Path(_provider): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "missing principal"}))).into_response();
    };
    let authorization_url = state.oauth.begin(&principal).await;
    (StatusCode::OK, Json(AuthorizeResponse { authorization_url })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(_provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    match state.oauth.complete(&query.code, &query.state).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "oauth callback failed");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": err.to_string()}))).into_response()
        }
    }
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.oauth.disconnect(&principal, &provider).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "oauth disconnect failed");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": err.to_string()}))).into_response()
        }
    }
}

/// Connection summary safe for the wire: never the encrypted token bytes (§4.1
/// "decrypted material must not cross a serialization boundary" extends here to
/// not exposing the ciphertext envelope to API clients at all).
#[derive(Debug, Serialize)]
struct ConnectionListItem {
    id: uuid::Uuid,
    provider: String,
    provider_user_id: String,
    scopes: Vec<String>,
    is_active: bool,
}

pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Path(_provider): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(principal) = principal_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(Vec::<ConnectionListItem>::new())).into_response();
    };
    let connections: Vec<ConnectionListItem> = state
        .store
        .list_oauth_connections(&principal)
        .await
        .into_iter()
        .map(|c| ConnectionListItem {
            id: c.id,
            provider: c.provider,
            provider_user_id: c.provider_user_id,
            scopes: c.scopes,
            is_active: c.is_active(),
        })
        .collect();
    (StatusCode::OK, Json(connections)).into_response()
}
