use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::error;

use crate::metrics::Metrics;
use crate::state::AppState;
use crate::worker::PoolStats;

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

pub async fn api_metrics_handler(State(state): State<Arc<AppState>>) -> Json<Metrics> {
    Json(state.dispatcher.monitor().get_metrics())
}

pub async fn pools_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PoolStats>> {
    Json(state.dispatcher.pools().pool_stats())
}
