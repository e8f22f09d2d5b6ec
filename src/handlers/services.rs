use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::dispatcher::deadline_token;
use crate::error::GatewayError;
use crate::models::ApiRequest;
use crate::state::AppState;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited(_) | GatewayError::QueueFull(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::ContextCancelled(_) => StatusCode::REQUEST_TIMEOUT,
            GatewayError::PoolClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. } | GatewayError::AllServicesFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

// raw dispatch; upstream status and content type pass through
pub async fn service_request_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(req): Json<ApiRequest>,
) -> Result<Response, GatewayError> {
    let deadline = deadline_token(&state.shutdown, state.request_timeout);
    let result = state
        .dispatcher
        .request_with_fallback(&deadline, &service, &req)
        .await;
    deadline.cancel();
    let upstream = result?;

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .headers
        .get(CONTENT_TYPE.as_str())
        .and_then(|v| HeaderValue::from_str(v).ok());
    let mut response = (status, upstream.body).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(response)
}
