use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use livetv_core::ResolveError;

pub const CHANNEL_UNAVAILABLE: &str = "This channel is not available";

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn unavailable() -> Self {
        ApiError::NotFound(CHANNEL_UNAVAILABLE.to_string())
    }

    pub fn bad_token() -> Self {
        ApiError::Forbidden("Invalid or missing token".to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_kind, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_kind.to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidUrl { .. } => ApiError::BadRequest(err.to_string()),
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            ResolveError::Store(msg) => ApiError::Internal(msg),
            e => ApiError::NotFound(format!("{}: {}", CHANNEL_UNAVAILABLE, e)),
        }
    }
}
