use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::generation::error::GenerationError;

/// Developer-facing hint attached to rate-limit failures.
pub const RATE_LIMIT_DEVELOPER_MESSAGE: &str =
    "The completion provider is rate limiting requests. Retry later or raise the API quota.";

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Profane: {0}")]
    Profane(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Generation failed: {0}")]
    Generation(String),
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidArgument(msg) => AppError::InvalidArgument(msg),
            GenerationError::AllProfane => AppError::Profane(err.to_string()),
            GenerationError::RateLimited(msg) => AppError::ResourceExhausted(msg),
            GenerationError::NotFound { .. }
            | GenerationError::LengthExhausted
            | GenerationError::ParseFailure(_)
            | GenerationError::Backend(_) => AppError::Generation(err.to_string()),
        }
    }
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            AppError::Profane(_) => (StatusCode::BAD_REQUEST, "PROFANE"),
            AppError::ResourceExhausted(_) => (StatusCode::TOO_MANY_REQUESTS, "RESOURCE_EXHAUSTED"),
            AppError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::InvalidArgument(msg) | AppError::Profane(msg) => msg.clone(),
            AppError::ResourceExhausted(msg) => {
                tracing::warn!("Rate limited: {msg}");
                "The service is overloaded, try again later".to_string()
            }
            AppError::Generation(msg) => {
                tracing::error!("Generation error: {msg}");
                "No suitable response found".to_string()
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if matches!(self, AppError::ResourceExhausted(_)) {
            error["developerMessage"] = json!(RATE_LIMIT_DEVELOPER_MESSAGE);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
