use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{CategoryRequest, CategoryResponse};
use crate::{
    auth::AuthUser,
    error::AppError,
    ids::PublicId,
    posts::PostResponse,
    resolver::Resolver,
    state::AppState,
    store::{CategoryChanges, NewCategory},
    validate,
};

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 1_000;

// --- public routers ---

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/categories/:id", get(get_category))
        .route("/categories/:id/posts", get(list_category_posts))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", post(create_category))
        .route("/categories/:id", put(update_category).delete(delete_category))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryResponse>>, AppError> {
    let views = state.store.list_categories().await?;
    Ok(Json(views.into_iter().map(CategoryResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<PublicId>,
) -> Result<Json<CategoryResponse>, AppError> {
    if !id.is_well_formed() {
        return Err(AppError::NotFound("category"));
    }
    let view = state
        .store
        .category_view(&id)
        .await?
        .ok_or(AppError::NotFound("category"))?;
    Ok(Json(view.into()))
}

#[instrument(skip(state))]
pub async fn list_category_posts(
    State(state): State<AppState>,
    Path(id): Path<PublicId>,
) -> Result<Json<Vec<PostResponse>>, AppError> {
    let key = Resolver::new(state.store.as_ref()).category(&id).await?;
    let posts = state.store.list_posts_by_category(key).await?;
    Ok(Json(posts.into_iter().map(PostResponse::from).collect()))
}

#[instrument(skip(state, auth, payload), fields(user_id = %auth.subject))]
pub async fn create_category(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CategoryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CategoryResponse>), AppError> {
    let Json(payload) = payload?;
    let name = validate::text("name", &payload.name, MAX_NAME_LEN)?;
    let description =
        validate::optional_text("description", &payload.description, MAX_DESCRIPTION_LEN)?;

    let resolver = Resolver::new(state.store.as_ref());
    let created_by = resolver.user(&auth.subject).await?;
    let parent_id = resolver.parent_category(payload.parent_id.as_ref()).await?;

    let row = state
        .store
        .insert_category(NewCategory {
            public_id: PublicId::generate(),
            name,
            description,
            parent_id,
            created_by,
        })
        .await?;

    info!(category_id = %row.public_id, "category created");
    Ok((
        StatusCode::CREATED,
        Json(CategoryResponse {
            id: row.public_id,
            name: row.name,
            description: row.description,
            parent_id: payload.parent_id,
            created_by: auth.subject,
            created_at: row.created_at,
        }),
    ))
}

#[instrument(skip(state, auth, payload), fields(user_id = %auth.subject))]
pub async fn update_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<PublicId>,
    payload: Result<Json<CategoryRequest>, JsonRejection>,
) -> Result<Json<CategoryResponse>, AppError> {
    let Json(payload) = payload?;
    let name = validate::text("name", &payload.name, MAX_NAME_LEN)?;
    let description =
        validate::optional_text("description", &payload.description, MAX_DESCRIPTION_LEN)?;

    let resolver = Resolver::new(state.store.as_ref());
    let key = resolver.category(&id).await?;
    let parent_id = resolver.parent_category(payload.parent_id.as_ref()).await?;

    let changes = CategoryChanges {
        name,
        description,
        parent_id,
    };
    if state.store.update_category(key, changes).await? == 0 {
        return Err(AppError::NotFound("category"));
    }

    let view = state
        .store
        .category_view(&id)
        .await?
        .ok_or(AppError::NotFound("category"))?;
    info!(category_id = %id, "category updated");
    Ok(Json(view.into()))
}

#[instrument(skip(state, auth), fields(user_id = %auth.subject))]
pub async fn delete_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<PublicId>,
) -> Result<StatusCode, AppError> {
    let key = Resolver::new(state.store.as_ref()).category(&id).await?;
    if state.store.delete_category(key).await? == 0 {
        return Err(AppError::NotFound("category"));
    }
    info!(category_id = %id, "category deleted");
    Ok(StatusCode::NO_CONTENT)
}
