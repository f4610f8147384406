pub mod auth;
pub mod clipboard;
pub mod error;
pub mod middleware;
pub mod sessions;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::auth::AppState;

/// Assemble the full route table. Session enforcement lives on the
/// protected sub-router, so adding a route there is all it takes to gate
/// it.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/version", get(version))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/logout", get(auth::logout))
        .route("/api/paste", post(clipboard::paste))
        .route("/api/clipboard", get(clipboard::current))
        .route("/api/clipboard/history", get(clipboard::history))
        .route("/api/poll", get(clipboard::poll))
        // Legacy alias kept for old clients; same handler as /api/clipboard.
        .route("/api/data", get(clipboard::current))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ))
        .with_state(state);

    public.merge(protected)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Server version, overridable at runtime (containers stamp APP_VERSION
/// at build time).
async fn version() -> Json<Value> {
    let version =
        std::env::var("APP_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
    Json(json!({ "status": "success", "version": version }))
}
