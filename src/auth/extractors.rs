use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{error::AppError, ids::PublicId};

/// Authenticated caller, placed in the request extensions by
/// [`require_auth`](super::middleware::require_auth).
///
/// Only usable on routes behind the gate; elsewhere extraction fails with 401.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: PublicId,
    pub token_id: Uuid,
    pub expires_at: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}
