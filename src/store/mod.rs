use async_trait::async_trait;

use crate::{
    error::StoreError,
    ids::{InternalKey, PublicId},
};

mod bounded;
mod memory;
mod postgres;
mod types;

pub use bounded::BoundedStore;
pub use memory::{MemoryStore, RowCounts};
pub use postgres::PgStore;
pub use types::*;

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) const SELF_PARENT: &str = "category cannot be its own parent";
pub(crate) const PARENT_CYCLE: &str = "parent would create a category cycle";

/// Persistence contract for the forum tables.
///
/// Implementations never hash or inspect passwords; they store and return
/// whatever hash they are given. Lookups return `Ok(None)` for a missing row,
/// updates and deletes return the affected row count.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // --- users ---
    /// Fails with [`StoreError::Conflict`] if the username is taken.
    async fn insert_user(&self, new: NewUser) -> StoreResult<UserRow>;
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>>;
    async fn user_by_public_id(&self, id: &PublicId) -> StoreResult<Option<UserRow>>;
    async fn list_users(&self) -> StoreResult<Vec<UserRow>>;

    // --- categories ---
    async fn insert_category(&self, new: NewCategory) -> StoreResult<CategoryRow>;
    async fn category_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CategoryRow>>;
    async fn category_by_key(&self, key: InternalKey) -> StoreResult<Option<CategoryRow>>;
    async fn category_view(&self, id: &PublicId) -> StoreResult<Option<CategoryView>>;
    async fn list_categories(&self) -> StoreResult<Vec<CategoryView>>;
    /// Applies the changes and checks the new parent chain as one atomic
    /// step. Fails with [`StoreError::Invalid`] if the category would become
    /// its own ancestor, even when another update races with this one.
    async fn update_category(&self, key: InternalKey, changes: CategoryChanges) -> StoreResult<u64>;
    /// Fails with [`StoreError::Conflict`] while posts still reference the category.
    async fn delete_category(&self, key: InternalKey) -> StoreResult<u64>;

    // --- posts ---
    async fn insert_post(&self, new: NewPost) -> StoreResult<PostRow>;
    async fn post_by_public_id(&self, id: &PublicId) -> StoreResult<Option<PostRow>>;
    async fn post_view(&self, id: &PublicId) -> StoreResult<Option<PostView>>;
    async fn list_posts(&self) -> StoreResult<Vec<PostView>>;
    async fn list_posts_by_category(&self, category: InternalKey) -> StoreResult<Vec<PostView>>;
    async fn update_post(&self, key: InternalKey, changes: PostChanges) -> StoreResult<u64>;
    /// Removes the post and its comments.
    async fn delete_post(&self, key: InternalKey) -> StoreResult<u64>;

    // --- comments ---
    async fn insert_comment(&self, new: NewComment) -> StoreResult<CommentRow>;
    async fn comment_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CommentRow>>;
    async fn list_comments_by_post(&self, post: InternalKey) -> StoreResult<Vec<CommentView>>;
    async fn delete_comment(&self, key: InternalKey) -> StoreResult<u64>;
}
