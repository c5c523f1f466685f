//! Typed API errors serialized as `{"code": ..., "message": ...}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NotFound,
    InvalidParameter,
    Internal,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InvalidParameter => StatusCode::BAD_REQUEST,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, what)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InvalidParameter, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Internal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code,
            "message": self.message,
        }));
        (self.code.status(), body).into_response()
    }
}

/// Log a database failure with context and map it to an opaque 500.
pub fn db_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    error!(error = %err, "{context} failed");
    ApiError::internal(format!("{context} failed"))
}

/// Same, for anyhow-flavored pipelines behind the cache.
pub fn cache_error(context: &str, err: anyhow::Error) -> ApiError {
    error!(error = ?err, "{context} failed");
    ApiError::internal(format!("{context} failed"))
}
