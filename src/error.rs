use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-facing error taxonomy.
///
/// Authentication failures collapse to a generic 401 so the client can never
/// tell expired from invalid from missing. Authorization and CSRF failures
/// are 403 and safe to describe. Anything else is a 500 with the detail kept
/// server-side.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid CSRF token")]
    CsrfRejected,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.clone()),
            ApiError::CsrfRejected => (StatusCode::FORBIDDEN, "invalid CSRF token".to_string()),
            ApiError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Outcome of a refresh-token rotation attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationError {
    /// Hash not present in the store at all.
    #[error("unknown refresh token")]
    Unknown,
    /// Token existed but is past its expiry.
    #[error("refresh token expired")]
    Expired,
    /// Rotation attempted on an already-revoked token: the signature of a
    /// replayed refresh. The whole session chain has been invalidated.
    #[error("refresh token replay detected; session chain invalidated")]
    ChainCompromised,
}
