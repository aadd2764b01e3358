use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /api/health — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub status: &'static str,
    pub last_seen: DateTime<Utc>,
}

/// GET /api/presence — Returns current presence for all tracked users.
async fn get_presence(State(state): State<AppState>) -> Json<Vec<PresenceResponse>> {
    let entries: Vec<PresenceResponse> = state
        .registry
        .all_presence()
        .into_iter()
        .map(|info| PresenceResponse {
            user_id: info.user.id,
            username: info.user.username,
            full_name: info.user.full_name,
            status: info.status.as_str(),
            last_seen: info.last_seen,
        })
        .collect();

    Json(entries)
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/api/health", get(health))
        .route("/api/presence", get(get_presence))
        .with_state(state)
}
