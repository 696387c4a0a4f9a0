//! Timeout and retry policy for record store calls.
//!
//! Every call is bounded by [`StoreConfig::timeout`]. Reads that fail with a
//! transient error are retried with exponential backoff plus jitter; writes
//! are never retried, since a write whose outcome is unknown must not be
//! replayed.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::{
    CategoryChanges, CategoryRow, CategoryView, CommentRow, CommentView, NewCategory, NewComment,
    NewPost, NewUser, PostChanges, PostRow, PostView, RecordStore, StoreResult, UserRow,
};
use crate::{
    config::StoreConfig,
    error::StoreError,
    ids::{InternalKey, PublicId},
};

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Wraps any [`RecordStore`] with the timeout/retry policy.
#[derive(Clone)]
pub struct BoundedStore {
    inner: Arc<dyn RecordStore>,
    cfg: StoreConfig,
}

impl BoundedStore {
    pub fn new(inner: Arc<dyn RecordStore>, cfg: StoreConfig) -> Self {
        Self { inner, cfg }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.cfg.timeout(), fut)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    async fn read<T, F, Fut>(&self, op: &'static str, call: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(call()).await {
                Err(err) if err.is_transient() && attempt < self.cfg.retry_attempts => {
                    let delay = backoff(self.cfg.backoff(), attempt);
                    debug!(
                        op,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(op, attempts = attempt + 1, error = %err, "store read failed");
                    }
                    return Err(err);
                }
                ok => return ok,
            }
        }
    }

    async fn write<T>(&self, op: &'static str, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let result = self.bounded(fut).await;
        if let Err(err) = &result {
            if err.is_transient() {
                warn!(op, error = %err, "store write failed");
            }
        }
        result
    }
}

/// `base * 2^attempt`, capped, plus up to 50% jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF);
    let jitter_ms = (exp.as_millis() as u64) / 2;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    exp + Duration::from_millis(jitter)
}

#[async_trait]
impl RecordStore for BoundedStore {
    async fn insert_user(&self, new: NewUser) -> StoreResult<UserRow> {
        self.write("insert_user", self.inner.insert_user(new)).await
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.read("user_by_username", || self.inner.user_by_username(username))
            .await
    }

    async fn user_by_public_id(&self, id: &PublicId) -> StoreResult<Option<UserRow>> {
        self.read("user_by_public_id", || self.inner.user_by_public_id(id))
            .await
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        self.read("list_users", || self.inner.list_users()).await
    }

    async fn insert_category(&self, new: NewCategory) -> StoreResult<CategoryRow> {
        self.write("insert_category", self.inner.insert_category(new))
            .await
    }

    async fn category_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CategoryRow>> {
        self.read("category_by_public_id", || self.inner.category_by_public_id(id))
            .await
    }

    async fn category_by_key(&self, key: InternalKey) -> StoreResult<Option<CategoryRow>> {
        self.read("category_by_key", || self.inner.category_by_key(key))
            .await
    }

    async fn category_view(&self, id: &PublicId) -> StoreResult<Option<CategoryView>> {
        self.read("category_view", || self.inner.category_view(id))
            .await
    }

    async fn list_categories(&self) -> StoreResult<Vec<CategoryView>> {
        self.read("list_categories", || self.inner.list_categories())
            .await
    }

    async fn update_category(&self, key: InternalKey, changes: CategoryChanges) -> StoreResult<u64> {
        self.write("update_category", self.inner.update_category(key, changes))
            .await
    }

    async fn delete_category(&self, key: InternalKey) -> StoreResult<u64> {
        self.write("delete_category", self.inner.delete_category(key))
            .await
    }

    async fn insert_post(&self, new: NewPost) -> StoreResult<PostRow> {
        self.write("insert_post", self.inner.insert_post(new)).await
    }

    async fn post_by_public_id(&self, id: &PublicId) -> StoreResult<Option<PostRow>> {
        self.read("post_by_public_id", || self.inner.post_by_public_id(id))
            .await
    }

    async fn post_view(&self, id: &PublicId) -> StoreResult<Option<PostView>> {
        self.read("post_view", || self.inner.post_view(id)).await
    }

    async fn list_posts(&self) -> StoreResult<Vec<PostView>> {
        self.read("list_posts", || self.inner.list_posts()).await
    }

    async fn list_posts_by_category(&self, category: InternalKey) -> StoreResult<Vec<PostView>> {
        self.read("list_posts_by_category", || {
            self.inner.list_posts_by_category(category)
        })
        .await
    }

    async fn update_post(&self, key: InternalKey, changes: PostChanges) -> StoreResult<u64> {
        self.write("update_post", self.inner.update_post(key, changes))
            .await
    }

    async fn delete_post(&self, key: InternalKey) -> StoreResult<u64> {
        self.write("delete_post", self.inner.delete_post(key)).await
    }

    async fn insert_comment(&self, new: NewComment) -> StoreResult<CommentRow> {
        self.write("insert_comment", self.inner.insert_comment(new))
            .await
    }

    async fn comment_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CommentRow>> {
        self.read("comment_by_public_id", || self.inner.comment_by_public_id(id))
            .await
    }

    async fn list_comments_by_post(&self, post: InternalKey) -> StoreResult<Vec<CommentView>> {
        self.read("list_comments_by_post", || self.inner.list_comments_by_post(post))
            .await
    }

    async fn delete_comment(&self, key: InternalKey) -> StoreResult<u64> {
        self.write("delete_comment", self.inner.delete_comment(key))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cfg(timeout_ms: u64, retry_attempts: u32) -> StoreConfig {
        StoreConfig {
            max_connections: 1,
            timeout_ms,
            retry_attempts,
            retry_backoff_ms: 1,
        }
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            public_id: PublicId::generate(),
            username: name.into(),
            password_hash: "hash".into(),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let base = Duration::from_millis(100);
        let first = backoff(base, 0);
        assert!(first >= base && first <= base * 3 / 2);
        let third = backoff(base, 2);
        assert!(third >= Duration::from_millis(400));
        assert!(backoff(base, 20) <= MAX_BACKOFF * 3 / 2);
    }

    #[tokio::test]
    async fn reads_retry_transient_failures() {
        let mem = Arc::new(MemoryStore::new());
        let store = BoundedStore::new(mem.clone(), cfg(1_000, 2));
        mem.fail_next(2);
        assert!(store.list_users().await.is_ok());
        assert_eq!(mem.calls(), 3);
    }

    #[tokio::test]
    async fn reads_give_up_after_bounded_attempts() {
        let mem = Arc::new(MemoryStore::new());
        let store = BoundedStore::new(mem.clone(), cfg(1_000, 1));
        mem.fail_next(5);
        let err = store.list_users().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(mem.calls(), 2);
    }

    #[tokio::test]
    async fn writes_are_not_retried() {
        let mem = Arc::new(MemoryStore::new());
        let store = BoundedStore::new(mem.clone(), cfg(1_000, 3));
        mem.fail_next(1);
        let err = store.insert_user(new_user("dave")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mem.calls(), 1);
        assert!(mem.user_by_username("dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn timed_out_write_never_lands() {
        let mem = Arc::new(MemoryStore::new());
        let store = BoundedStore::new(mem.clone(), cfg(20, 0));
        mem.set_latency(Duration::from_millis(200));

        let err = store.insert_user(new_user("erin")).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout));

        mem.set_latency(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(mem.user_by_username("erin").await.unwrap().is_none());
    }
}
