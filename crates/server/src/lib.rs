//! HTTP surface for the CI remediation service: ingest, OAuth, and
//! repository-connection endpoints (§6). Mirrors the reference's
//! `crates/healer/src/ci/server.rs` shape: a `State<Arc<_>>` struct, plain handler
//! functions, one `build_router` assembling them behind `TraceLayer`.

mod ingest;
mod oauth_routes;
mod repository_routes;
mod state;

pub use state::AppState;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/{provider}", post(ingest::webhook_handler))
        .route("/oauth/{provider}/authorize", get(oauth_routes::begin_authorize))
        .route("/oauth/{provider}/callback", get(oauth_routes::callback))
        .route("/oauth/{provider}", delete(oauth_routes::disconnect))
        .route("/oauth/{provider}/connections", get(oauth_routes::list_connections))
        .route(
            "/repositories",
            get(repository_routes::list_available).post(repository_routes::connect),
        )
        .route("/repositories/connections", get(repository_routes::list_connections))
        .route(
            "/repositories/connections/{id}",
            get(repository_routes::get_connection)
                .patch(repository_routes::update_connection)
                .delete(repository_routes::disconnect),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
