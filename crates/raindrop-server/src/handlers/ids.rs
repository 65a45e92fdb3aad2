use crate::error::{AppError, Result};
use crate::model::{DecodedIdResponse, IdResponse};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use raindrop_worker::WorkerSlot;
use std::sync::Arc;

/// Longest namespace code accepted over HTTP.
const MAX_CODE_LEN: usize = 128;

// Generation may wait out an exhausted tick, so it runs off the async workers.
pub async fn next_id_handler(State(state): State<AppState>) -> Result<Json<IdResponse>> {
    let raindrop = Arc::clone(state.raindrop());
    let id = tokio::task::spawn_blocking(move || raindrop.new_id()).await??;
    Ok(Json(IdResponse { id, code: None }))
}

pub async fn next_id_for_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<IdResponse>> {
    if code.is_empty() || code.chars().count() > MAX_CODE_LEN {
        return Err(AppError::InvalidCode { max: MAX_CODE_LEN });
    }

    let raindrop = Arc::clone(state.raindrop());
    let namespace = code.clone();
    let id = tokio::task::spawn_blocking(move || raindrop.new_id_for(&namespace)).await??;
    Ok(Json(IdResponse {
        id,
        code: Some(code),
    }))
}

pub async fn decode_id_handler(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<DecodedIdResponse> {
    let raindrop = state.raindrop();
    let parts = raindrop.decode(id);
    Json(DecodedIdResponse {
        id,
        parts,
        timestamp: raindrop.timestamp_of(&parts),
    })
}

pub async fn worker_handler(State(state): State<AppState>) -> Json<WorkerSlot> {
    Json(state.raindrop().worker_slot())
}
