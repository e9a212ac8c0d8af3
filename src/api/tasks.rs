//! Next task for a recording, from the model or the built-in catalog.

use super::{ApiResult, ApiState};
use crate::error::TaskTapeError;
use crate::recording::{Task, TaskSource};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

pub fn router() -> Router<ApiState> {
    Router::new().route("/api/tasks/next", get(next_task))
}

#[derive(Debug, Deserialize)]
struct NextTaskQuery {
    #[serde(default = "default_source")]
    source: TaskSource,
}

fn default_source() -> TaskSource {
    TaskSource::Database
}

async fn next_task(
    State(state): State<ApiState>,
    Query(query): Query<NextTaskQuery>,
) -> ApiResult<Json<Task>> {
    match query.source {
        TaskSource::Database => state
            .catalog
            .next_task()
            .map(Json)
            .ok_or_else(|| (StatusCode::NOT_FOUND, "Task catalog is empty".to_string())),
        TaskSource::Llm => {
            let api_key = state.config.read().openrouter.api_key.clone();
            let Some(api_key) = api_key else {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "OpenRouter api_key is not configured".to_string(),
                ));
            };
            state
                .task_generator
                .generate_task(&api_key)
                .await
                .map(Json)
                .map_err(|e| match e {
                    TaskTapeError::Transport(_) => (StatusCode::BAD_GATEWAY, e.to_string()),
                    other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
                })
        }
    }
}
