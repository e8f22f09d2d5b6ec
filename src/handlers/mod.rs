mod health;
mod metrics;
mod services;
mod widgets;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;

use crate::state::AppState;

pub use health::health_handler;
pub use metrics::{api_metrics_handler, metrics_handler, pools_handler};
pub use services::service_request_handler;
pub use widgets::widgets_handler;

// creating the router with routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler)) // prometheus text
        .route("/api/metrics", get(api_metrics_handler))
        .route("/api/pools", get(pools_handler))
        .route("/api/services/{service}/request", post(service_request_handler))
        .route("/api/widgets", get(widgets_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_http))
        .with_state(state)
}

async fn track_http(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;
    state
        .dispatcher
        .monitor()
        .record_http_request(start.elapsed(), response.status().is_server_error());
    response
}
