use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest},
    extractors::AuthUser,
    password::{hash_password, verify_or_dummy},
    repo,
};
use crate::{error::AppError, state::AppState, validate};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/logout", post(logout))
}

fn auth_response(state: &AppState, user: PublicUser) -> Result<AuthResponse, AppError> {
    let token = state.keys.issue(&user.id).map_err(|e| {
        error!(error = %e, "token signing failed");
        AppError::Internal(e.to_string())
    })?;
    Ok(AuthResponse {
        token,
        token_type: "Bearer",
        expires_in: state.keys.ttl().as_secs(),
        user,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let Json(payload) = payload?;
    let username = validate::username(&payload.username)?;
    validate::password(&payload.password)?;

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        AppError::Internal(e.to_string())
    })?;

    let user = match repo::create(state.store.as_ref(), &username, &hash).await {
        Ok(u) => u,
        Err(AppError::Conflict(msg)) => {
            warn!(%username, "username already registered");
            return Err(AppError::Conflict(msg));
        }
        Err(e) => return Err(e),
    };

    info!(user_id = %user.public_id, "user registered");
    let response = auth_response(&state, user.into())?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let username = payload.username.trim();

    let user = match repo::find_by_username(state.store.as_ref(), username).await {
        Ok(u) => Some(u),
        Err(AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let ok = verify_or_dummy(&payload.password, user.as_ref().map(|u| u.password_hash.as_str()))
        .map_err(|e| {
            error!(error = %e, "verify_password failed");
            AppError::Internal(e.to_string())
        })?;

    let user = match user {
        Some(u) if ok => u,
        _ => {
            warn!(%username, "login rejected");
            return Err(AppError::InvalidCredentials);
        }
    };

    info!(user_id = %user.public_id, "user logged in");
    Ok(Json(auth_response(&state, user.into())?))
}

#[instrument(skip(state, auth), fields(user_id = %auth.subject))]
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> StatusCode {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    state.revoked.revoke(auth.token_id, auth.expires_at, now).await;
    info!("user logged out");
    StatusCode::NO_CONTENT
}

#[instrument(skip(state, auth), fields(user_id = %auth.subject))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = repo::find_by_public_id(state.store.as_ref(), &auth.subject).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<PublicUser>>, AppError> {
    let users = state.store.list_users().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PublicId;

    #[test]
    fn public_user_serialization_hides_internals() {
        let response = PublicUser {
            id: PublicId::generate(),
            username: "alice".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&response).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("id"));
        assert!(!obj.contains_key("password_hash"));
        assert_eq!(obj["created_at"], "1970-01-01T00:00:00Z");
    }
}
