//! Error types for the engine and the API layer.
//!
//! The engine-side taxonomy is small: `ConfigError` for rules rejected at
//! write time and `StoreError` for an unavailable counter/audit backend.
//! `ResolveError` lives in [`crate::geo`] next to the resolver. All of them
//! convert into `ApiError` at the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Rule validation failure. Invalid rules are rejected and never stored.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A rule field failed validation (non-positive limit, empty pattern...).
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Referenced rule does not exist.
    #[error("rule {0} not found")]
    RuleNotFound(Uuid),
}

/// Counter or audit store unavailable.
///
/// The in-process stores never produce this, but the engine handles it per
/// the rule's fail-open/fail-closed mode so a remote-backed store can slot in.
#[derive(Debug, thiserror::Error)]
#[error("store unavailable: {0}")]
pub struct StoreError(pub String);

/// API error shared across all HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid request body/query.
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("{0}")]
    Conflict(String),

    /// A backing dependency is unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidRule(msg) => Self::BadRequest(msg),
            ConfigError::RuleNotFound(id) => Self::NotFound(format!("rule {id} not found")),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// HTTP response conversion
// ---------------------------------------------------------------------------

/// JSON error body returned by every failing endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error code (e.g. "bad_request", "not_found", "internal_error").
    pub(crate) error: String,
    /// Human-readable error detail, if available.
    pub(crate) detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                Some(msg.clone()),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(%msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some(msg.clone()),
                )
            }
        };

        let body = ErrorBody {
            error: error.to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}
