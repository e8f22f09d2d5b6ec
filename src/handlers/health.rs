use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::state::AppState;

// health handler
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = state.health.snapshot();
    let status = if services.values().all(|s| s.healthy) {
        "healthy"
    } else {
        "degraded"
    };
    Json(serde_json::json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": services,
    }))
}
