use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// HTTP-surfaced error, one variant per response shape spec.md §6/§7
/// defines. Handlers return `Result<_, ApiError>`; this carries the
/// mapping to status code and JSON body in one place, the way the
/// teacher's root `error::Error` carries it for its own surface.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(Vec<String>),
    Unauthorized,
    NotFound,
    LeaseConflict,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidRequest(details) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "invalid_request", "details": details}),
            ),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"})),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "not_found"})),
            ApiError::LeaseConflict => (StatusCode::CONFLICT, json!({"error": "lease_conflict"})),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "unhandled error in HTTP handler");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "internal_error"}))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<cortex_store::StoreError> for ApiError {
    fn from(e: cortex_store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
