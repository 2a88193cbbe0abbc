use axum::{extract::Extension, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    broker: String,
    is_paused: bool,
    chats: usize,
}

/// Health check endpoint
///
/// Reports the broker adapter in use, the pause flag and the number of chats
/// in the directory. Always 200 once the server is accepting requests.
pub async fn health_handler(Extension(state): Extension<AppState>) -> Json<HealthResponse> {
    let chats = state.chats();
    Json(HealthResponse {
        status: "healthy".to_string(),
        broker: chats.deps().broker.kind().to_string(),
        is_paused: state.orchestrator.flow().is_paused(),
        chats: chats.directory().len(),
    })
}
