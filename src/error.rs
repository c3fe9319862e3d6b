// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

// Error type for the HTTP handler layer. Socket handlers surface failures as
// `error` events instead and never go through this path.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full detail stays server-side.
        tracing::error!("HTTP Handler Error: {}", self);

        let (status, error_message) = match self {
            AppError::RoomNotFound(room_id) => {
                (StatusCode::NOT_FOUND, format!("Room not found: {}", room_id))
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        (status, error_message).into_response()
    }
}
