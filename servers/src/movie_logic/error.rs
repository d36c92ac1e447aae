//! # HTTP Error Mapping
//!
//! Every failure a handler or middleware can produce ends up as an
//! [`AppError`], which renders a JSON body of the form `{ "error": "..." }`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use lib_common::aggregator::RelayError;
use lib_common::retrieve::UpstreamError;
use serde_json::json;
use tracing::error;

/// Message shown to callers who exceeded their quota.
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
/// Message shown for any internal fault. The cause is logged, not exposed.
pub const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug)]
pub enum AppError {
    /// Malformed or incomplete input. No backend call was made.
    BadRequest(String),
    /// The admission gate denied the request.
    RateLimited { retry_after_secs: u64 },
    /// The backend answered with a non-success status.
    Upstream { status: u16, message: String },
    /// No route matched.
    NotFound,
    /// Anything else.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            AppError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": RATE_LIMITED_MESSAGE,
                        "retryAfter": retry_after_secs,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            AppError::Upstream { status, message } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(json!({ "error": message }))).into_response()
            }
            AppError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
            }
            AppError::Internal(cause) => {
                error!("Request failed: {}", cause);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": INTERNAL_MESSAGE })),
                )
                    .into_response()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::BadRequest(m) => write!(f, "Bad request: {}", m),
            AppError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited, retry after {}s", retry_after_secs)
            }
            AppError::Upstream { status, message } => write!(f, "Backend error {}: {}", status, message),
            AppError::NotFound => write!(f, "Not found"),
            AppError::Internal(cause) => write!(f, "Internal error: {}", cause),
        }
    }
}

impl std::error::Error for AppError {}

impl From<UpstreamError> for AppError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Status { status, message } => AppError::Upstream { status, message },
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        AppError::Internal(e.to_string())
    }
}
