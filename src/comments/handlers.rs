use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{CommentRequest, CommentResponse};
use crate::{
    auth::AuthUser,
    error::AppError,
    ids::PublicId,
    resolver::Resolver,
    state::AppState,
    store::NewComment,
    validate,
};

const MAX_CONTENT_LEN: usize = 5_000;

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/comments", post(create_comment))
        .route("/comments/:id", delete(delete_comment))
}

#[instrument(skip(state, auth, payload), fields(user_id = %auth.subject))]
pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CommentResponse>), AppError> {
    let Json(payload) = payload?;
    let content = validate::text("content", &payload.content, MAX_CONTENT_LEN)?;

    let resolver = Resolver::new(state.store.as_ref());
    let user_id = resolver.user(&auth.subject).await?;
    let post_id = resolver.post(&payload.post_id).await?;

    let row = state
        .store
        .insert_comment(NewComment {
            public_id: PublicId::generate(),
            content,
            post_id,
            user_id,
        })
        .await?;

    info!(comment_id = %row.public_id, "comment created");
    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: row.public_id,
            content: row.content,
            post_id: payload.post_id,
            author_id: auth.subject,
            created_at: row.created_at,
        }),
    ))
}

#[instrument(skip(state, auth), fields(user_id = %auth.subject))]
pub async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<PublicId>,
) -> Result<StatusCode, AppError> {
    let key = Resolver::new(state.store.as_ref()).comment(&id).await?;
    if state.store.delete_comment(key).await? == 0 {
        return Err(AppError::NotFound("comment"));
    }
    info!(comment_id = %id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}
