//! Stored sequences: listing, upload and replay.

use super::{internal_err, ApiResult, ApiState};
use crate::recording::RecordingSequence;
use crate::replay::{ReplayExecutor, ReplayReport};
use crate::services::UploadResult;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/sequences", get(list_sequences))
        .route("/api/sequences/:id", get(get_sequence))
        .route("/api/sequences/:id/upload", post(upload_sequence))
        .route("/api/sequences/:id/replay", post(replay_sequence))
}

async fn find(state: &ApiState, id: &str) -> ApiResult<RecordingSequence> {
    state
        .sequences
        .get(id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Sequence not found".to_string()))
}

async fn list_sequences(State(state): State<ApiState>) -> ApiResult<Json<Vec<RecordingSequence>>> {
    state.sequences.list().await.map(Json).map_err(internal_err)
}

async fn get_sequence(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<RecordingSequence>> {
    find(&state, &id).await.map(Json)
}

async fn upload_sequence(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<UploadResult>> {
    let sequence = find(&state, &id).await?;
    let (api_key, repo) = {
        let config = state.config.read();
        (
            config.huggingface.api_key.clone(),
            config.huggingface.dataset_repo.clone(),
        )
    };
    let (Some(api_key), Some(repo)) = (api_key, repo) else {
        return Ok(Json(UploadResult::failed(
            "Hugging Face api_key and dataset_repo must be configured",
        )));
    };
    Ok(Json(
        state.uploader.upload_sequence(&sequence, &api_key, &repo).await,
    ))
}

async fn replay_sequence(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ReplayReport>> {
    let sequence = find(&state, &id).await?;
    let page = state.page().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "No page attached".to_string(),
        )
    })?;
    ReplayExecutor::new(page)
        .execute(&sequence)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
}
