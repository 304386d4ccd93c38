//! Error types for the Chunkdrop server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::storage::PathSafetyError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors of the listing and download routes
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Security violation: invalid path")]
    PathSafety(#[source] PathSafetyError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PathSafetyError> for AppError {
    fn from(err: PathSafetyError) -> Self {
        match err {
            PathSafetyError::Io { source, .. } => Self::Io(source),
            violation => Self::PathSafety(violation),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "File not found".to_string()),
            AppError::PathSafety(e) => {
                tracing::warn!(error = %e, "Rejected unsafe path");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }
        };

        (status, message).into_response()
    }
}
