use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::extractors::AuthUser;
use crate::{error::AppError, state::AppState};

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Gate for protected route groups.
///
/// Rejects with 401 before the handler runs when the token is missing,
/// invalid, expired or revoked. On success the verified subject is stored in
/// the request extensions as [`AuthUser`]. Every request starts
/// unauthenticated; nothing carries over between requests.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(req.headers()) else {
        debug!(uri = %req.uri(), "missing bearer token");
        return Err(AppError::Unauthenticated);
    };

    let claims = state.keys.verify(token).map_err(|_| {
        warn!(uri = %req.uri(), "invalid or expired token");
        AppError::Unauthenticated
    })?;

    if state.revoked.is_revoked(&claims.jti).await {
        warn!(jti = %claims.jti, "revoked token presented");
        return Err(AppError::Unauthenticated);
    }

    req.extensions_mut().insert(AuthUser {
        subject: claims.sub,
        token_id: claims.jti,
        expires_at: claims.exp,
    });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
