use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures reported by a [`RecordStore`](crate::store::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Uniqueness or restrict constraint violated; carries a client-safe message.
    #[error("{0}")]
    Conflict(String),

    /// A relational link points at a row that no longer exists.
    #[error("referenced {0} does not exist")]
    ForeignKey(&'static str),

    /// The write would break an invariant the store enforces (category tree
    /// shape); carries a client-safe message.
    #[error("{0}")]
    Invalid(String),

    /// Connection-level failure. Safe to retry.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within the configured bound. Safe to retry.
    #[error("record store call timed out")]
    Timeout,

    /// Anything else the backend reports (decode errors, bad SQL).
    #[error("record store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }
}

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed, forged, expired or revoked token. Deliberately opaque.
    #[error("unauthorized")]
    Unauthenticated,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} not found")]
    UnresolvedReference(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("service temporarily unavailable")]
    StoreUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) | AppError::UnresolvedReference(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(detail) => {
                error!(error = %detail, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound("record"),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::ForeignKey(entity) => AppError::UnresolvedReference(entity),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            StoreError::Unavailable(_) | StoreError::Timeout => AppError::StoreUnavailable,
            StoreError::Backend(detail) => AppError::Internal(detail),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::UnresolvedReference("category").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::Validation("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::StoreUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unresolved_reference_names_the_entity() {
        assert_eq!(
            AppError::UnresolvedReference("category").to_string(),
            "category not found"
        );
    }

    #[test]
    fn only_connection_failures_are_transient() {
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::Unavailable("reset".into()).is_transient());
        assert!(!StoreError::NotFound.is_transient());
        assert!(!StoreError::Conflict("username".into()).is_transient());
        assert!(!StoreError::ForeignKey("post").is_transient());
    }

    #[test]
    fn invalid_write_is_a_bad_request() {
        let err: AppError = StoreError::Invalid("parent would create a category cycle".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "parent would create a category cycle");
        assert!(!StoreError::Invalid("x".into()).is_transient());
    }

    #[test]
    fn foreign_key_becomes_unresolved_reference() {
        let err: AppError = StoreError::ForeignKey("post").into();
        assert!(matches!(err, AppError::UnresolvedReference("post")));
    }
}
