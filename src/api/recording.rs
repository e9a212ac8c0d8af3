//! Protocol messages and recording state.

use super::{ApiResult, ApiState};
use crate::recording::{Message, MessageResponse, RecordingState};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/messages", post(post_message))
        .route("/api/recording/state", get(get_state))
}

async fn post_message(
    State(state): State<ApiState>,
    Json(message): Json<Message>,
) -> Json<MessageResponse> {
    tracing::debug!("API message {}", message.kind());
    Json(state.coordinator.handle_message(message).await)
}

async fn get_state(State(state): State<ApiState>) -> ApiResult<Json<RecordingState>> {
    state
        .coordinator
        .state()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}
