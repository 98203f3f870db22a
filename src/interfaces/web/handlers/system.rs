use axum::{Json, extract::State};

use super::super::AppState;
use super::ApiResult;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok"
    }))
}

pub async fn daemon_status(State(state): State<AppState>) -> ApiResult {
    let status = state.service.status().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "status": status
    })))
}

/// Ask the owning process to shut down; the response is sent before the
/// drain starts.
pub async fn stop_daemon(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::info!("Shutdown requested over the API");
    state.stop.cancel();
    Json(serde_json::json!({
        "success": true,
        "stopping": true
    }))
}
