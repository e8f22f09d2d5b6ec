use axum::{Json, extract::State};
use std::sync::Arc;

use crate::state::AppState;
use crate::widget::WidgetData;

// every configured widget, in configuration order
pub async fn widgets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<WidgetData>> {
    Json(state.loader.load_all(&state.widgets, &state.shutdown).await)
}
