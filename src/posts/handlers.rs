use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{PostRequest, PostResponse};
use crate::{
    auth::AuthUser,
    comments::CommentResponse,
    error::AppError,
    ids::PublicId,
    resolver::Resolver,
    state::AppState,
    store::{NewPost, PostChanges},
    validate,
};

const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 10_000;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:id", get(get_post))
        .route("/posts/:id/comments", get(list_post_comments))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/:id", put(update_post).delete(delete_post))
}

#[instrument(skip(state))]
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<PostResponse>>, AppError> {
    let posts = state.store.list_posts().await?;
    Ok(Json(posts.into_iter().map(PostResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<PublicId>,
) -> Result<Json<PostResponse>, AppError> {
    if !id.is_well_formed() {
        return Err(AppError::NotFound("post"));
    }
    let view = state
        .store
        .post_view(&id)
        .await?
        .ok_or(AppError::NotFound("post"))?;
    Ok(Json(view.into()))
}

#[instrument(skip(state))]
pub async fn list_post_comments(
    State(state): State<AppState>,
    Path(id): Path<PublicId>,
) -> Result<Json<Vec<CommentResponse>>, AppError> {
    let key = Resolver::new(state.store.as_ref()).post(&id).await?;
    let comments = state.store.list_comments_by_post(key).await?;
    Ok(Json(comments.into_iter().map(CommentResponse::from).collect()))
}

/// POST /posts
///
/// The author comes from the token, never from the body. Both references are
/// resolved before the insert, so an unknown category leaves no row behind.
#[instrument(skip(state, auth, payload), fields(user_id = %auth.subject))]
pub async fn create_post(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<PostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PostResponse>), AppError> {
    let Json(payload) = payload?;
    let title = validate::text("title", &payload.title, MAX_TITLE_LEN)?;
    let content = validate::text("content", &payload.content, MAX_CONTENT_LEN)?;

    let resolver = Resolver::new(state.store.as_ref());
    let user_id = resolver.user(&auth.subject).await?;
    let category_id = resolver.category(&payload.category_id).await?;

    let row = state
        .store
        .insert_post(NewPost {
            public_id: PublicId::generate(),
            title,
            content,
            user_id,
            category_id,
        })
        .await?;

    info!(post_id = %row.public_id, "post created");
    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: row.public_id,
            title: row.title,
            content: row.content,
            author_id: auth.subject,
            category_id: payload.category_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }),
    ))
}

#[instrument(skip(state, auth, payload), fields(user_id = %auth.subject))]
pub async fn update_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<PublicId>,
    payload: Result<Json<PostRequest>, JsonRejection>,
) -> Result<Json<PostResponse>, AppError> {
    let Json(payload) = payload?;
    let title = validate::text("title", &payload.title, MAX_TITLE_LEN)?;
    let content = validate::text("content", &payload.content, MAX_CONTENT_LEN)?;

    let resolver = Resolver::new(state.store.as_ref());
    let key = resolver.post(&id).await?;
    let category_id = resolver.category(&payload.category_id).await?;

    let changes = PostChanges {
        title,
        content,
        category_id,
    };
    if state.store.update_post(key, changes).await? == 0 {
        return Err(AppError::NotFound("post"));
    }

    let view = state
        .store
        .post_view(&id)
        .await?
        .ok_or(AppError::NotFound("post"))?;
    info!(post_id = %id, "post updated");
    Ok(Json(view.into()))
}

#[instrument(skip(state, auth), fields(user_id = %auth.subject))]
pub async fn delete_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<PublicId>,
) -> Result<StatusCode, AppError> {
    let key = Resolver::new(state.store.as_ref()).post(&id).await?;
    if state.store.delete_post(key).await? == 0 {
        return Err(AppError::NotFound("post"));
    }
    info!(post_id = %id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}
