use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use raindrop_flake::Error as FlakeError;
use raindrop_worker::RaindropError;
use thiserror::Error;
use tracing::error;

use crate::model::ErrorResponse;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("namespace code must be 1 to {max} characters")]
    InvalidCode { max: usize },
    #[error(transparent)]
    Raindrop(#[from] RaindropError),
    #[error("id generation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidCode { .. } => StatusCode::BAD_REQUEST,
            AppError::Raindrop(RaindropError::Stopped) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Raindrop(RaindropError::Flake(FlakeError::TooManyNamespaces { .. })) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Raindrop(err) if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Raindrop(_) | AppError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
