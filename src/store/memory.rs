use std::{
    collections::{BTreeMap, HashSet},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    CategoryChanges, CategoryRow, CategoryView, CommentRow, CommentView, NewCategory, NewComment,
    NewPost, NewUser, PostChanges, PostRow, PostView, RecordStore, StoreResult, UserRow,
    PARENT_CYCLE, SELF_PARENT,
};
use crate::{
    error::StoreError,
    ids::{InternalKey, PublicId},
};

#[derive(Default)]
struct Tables {
    last_key: i64,
    users: BTreeMap<InternalKey, UserRow>,
    categories: BTreeMap<InternalKey, CategoryRow>,
    posts: BTreeMap<InternalKey, PostRow>,
    comments: BTreeMap<InternalKey, CommentRow>,
}

impl Tables {
    fn next_key(&mut self) -> InternalKey {
        self.last_key += 1;
        InternalKey::new(self.last_key)
    }

    /// True if `ancestor` is `start` or appears on its parent chain. Stops at
    /// an unrelated pre-existing loop instead of spinning.
    fn has_ancestor(&self, start: InternalKey, ancestor: InternalKey) -> bool {
        let mut seen = HashSet::new();
        let mut next = Some(start);
        while let Some(key) = next {
            if key == ancestor {
                return true;
            }
            if !seen.insert(key) {
                return false;
            }
            next = self.categories.get(&key).and_then(|c| c.parent_id);
        }
        false
    }

    fn user_public_id(&self, key: InternalKey) -> StoreResult<PublicId> {
        self.users
            .get(&key)
            .map(|u| u.public_id.clone())
            .ok_or(StoreError::ForeignKey("user"))
    }

    fn category_view(&self, row: &CategoryRow) -> StoreResult<CategoryView> {
        Ok(CategoryView {
            public_id: row.public_id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            parent: row
                .parent_id
                .and_then(|k| self.categories.get(&k))
                .map(|p| p.public_id.clone()),
            created_by: self.user_public_id(row.created_by)?,
            created_at: row.created_at,
        })
    }

    fn post_view(&self, row: &PostRow) -> StoreResult<PostView> {
        let category = self
            .categories
            .get(&row.category_id)
            .ok_or(StoreError::ForeignKey("category"))?;
        Ok(PostView {
            public_id: row.public_id.clone(),
            title: row.title.clone(),
            content: row.content.clone(),
            author: self.user_public_id(row.user_id)?,
            category: category.public_id.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn comment_view(&self, row: &CommentRow) -> StoreResult<CommentView> {
        let post = self
            .posts
            .get(&row.post_id)
            .ok_or(StoreError::ForeignKey("post"))?;
        Ok(CommentView {
            public_id: row.public_id.clone(),
            content: row.content.clone(),
            post: post.public_id.clone(),
            author: self.user_public_id(row.user_id)?,
            created_at: row.created_at,
        })
    }
}

/// Row totals per table, for inspecting what a request left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub users: usize,
    pub categories: usize,
    pub posts: usize,
    pub comments: usize,
}

/// In-process record store with the same constraints as the Postgres schema
/// (unique usernames, foreign keys, restrict/cascade on delete).
///
/// Latency and transient failures can be injected to exercise the timeout and
/// retry paths. A write that is cancelled while "in flight" never lands.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    latency_ms: AtomicU64,
    failures: AtomicU32,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `n` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of calls received so far, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current row totals. Not counted as a call and ignores injected faults.
    pub async fn counts(&self) -> RowCounts {
        let t = self.tables.read().await;
        RowCounts {
            users: t.users.len(),
            categories: t.categories.len(),
            posts: t.posts.len(),
            comments: t.comments.len(),
        }
    }

    async fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> StoreResult<UserRow> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.username == new.username) {
            return Err(StoreError::Conflict("username already taken".into()));
        }
        let row = UserRow {
            id: t.next_key(),
            public_id: new.public_id,
            username: new.username,
            password_hash: new.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn user_by_public_id(&self, id: &PublicId) -> StoreResult<Option<UserRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| &u.public_id == id).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.users.values().cloned().collect())
    }

    async fn insert_category(&self, new: NewCategory) -> StoreResult<CategoryRow> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&new.created_by) {
            return Err(StoreError::ForeignKey("user"));
        }
        if let Some(parent) = new.parent_id {
            if !t.categories.contains_key(&parent) {
                return Err(StoreError::ForeignKey("parent category"));
            }
        }
        let row = CategoryRow {
            id: t.next_key(),
            public_id: new.public_id,
            name: new.name,
            description: new.description,
            parent_id: new.parent_id,
            created_by: new.created_by,
            created_at: OffsetDateTime::now_utc(),
        };
        t.categories.insert(row.id, row.clone());
        Ok(row)
    }

    async fn category_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CategoryRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.categories.values().find(|c| &c.public_id == id).cloned())
    }

    async fn category_by_key(&self, key: InternalKey) -> StoreResult<Option<CategoryRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.categories.get(&key).cloned())
    }

    async fn category_view(&self, id: &PublicId) -> StoreResult<Option<CategoryView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        t.categories
            .values()
            .find(|c| &c.public_id == id)
            .map(|c| t.category_view(c))
            .transpose()
    }

    async fn list_categories(&self) -> StoreResult<Vec<CategoryView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        let mut views = t
            .categories
            .values()
            .map(|c| t.category_view(c))
            .collect::<StoreResult<Vec<_>>>()?;
        views.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }

    async fn update_category(&self, key: InternalKey, changes: CategoryChanges) -> StoreResult<u64> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if let Some(parent) = changes.parent_id {
            if parent == key {
                return Err(StoreError::Invalid(SELF_PARENT.into()));
            }
            if !t.categories.contains_key(&parent) {
                return Err(StoreError::ForeignKey("parent category"));
            }
            // walked under the write lock, so no concurrent update can slip in
            if t.has_ancestor(parent, key) {
                return Err(StoreError::Invalid(PARENT_CYCLE.into()));
            }
        }
        let Some(row) = t.categories.get_mut(&key) else {
            return Ok(0);
        };
        row.name = changes.name;
        row.description = changes.description;
        row.parent_id = changes.parent_id;
        Ok(1)
    }

    async fn delete_category(&self, key: InternalKey) -> StoreResult<u64> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if t.posts.values().any(|p| p.category_id == key) {
            return Err(StoreError::Conflict("category still has posts".into()));
        }
        if t.categories.remove(&key).is_none() {
            return Ok(0);
        }
        for child in t.categories.values_mut() {
            if child.parent_id == Some(key) {
                child.parent_id = None;
            }
        }
        Ok(1)
    }

    async fn insert_post(&self, new: NewPost) -> StoreResult<PostRow> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&new.user_id) {
            return Err(StoreError::ForeignKey("user"));
        }
        if !t.categories.contains_key(&new.category_id) {
            return Err(StoreError::ForeignKey("category"));
        }
        let now = OffsetDateTime::now_utc();
        let row = PostRow {
            id: t.next_key(),
            public_id: new.public_id,
            title: new.title,
            content: new.content,
            user_id: new.user_id,
            category_id: new.category_id,
            created_at: now,
            updated_at: now,
        };
        t.posts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn post_by_public_id(&self, id: &PublicId) -> StoreResult<Option<PostRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.posts.values().find(|p| &p.public_id == id).cloned())
    }

    async fn post_view(&self, id: &PublicId) -> StoreResult<Option<PostView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        t.posts
            .values()
            .find(|p| &p.public_id == id)
            .map(|p| t.post_view(p))
            .transpose()
    }

    async fn list_posts(&self) -> StoreResult<Vec<PostView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        // newest first, keys are handed out in creation order
        t.posts.values().rev().map(|p| t.post_view(p)).collect()
    }

    async fn list_posts_by_category(&self, category: InternalKey) -> StoreResult<Vec<PostView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        t.posts
            .values()
            .rev()
            .filter(|p| p.category_id == category)
            .map(|p| t.post_view(p))
            .collect()
    }

    async fn update_post(&self, key: InternalKey, changes: PostChanges) -> StoreResult<u64> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if !t.categories.contains_key(&changes.category_id) {
            return Err(StoreError::ForeignKey("category"));
        }
        let Some(row) = t.posts.get_mut(&key) else {
            return Ok(0);
        };
        row.title = changes.title;
        row.content = changes.content;
        row.category_id = changes.category_id;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(1)
    }

    async fn delete_post(&self, key: InternalKey) -> StoreResult<u64> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if t.posts.remove(&key).is_none() {
            return Ok(0);
        }
        t.comments.retain(|_, c| c.post_id != key);
        Ok(1)
    }

    async fn insert_comment(&self, new: NewComment) -> StoreResult<CommentRow> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        if !t.posts.contains_key(&new.post_id) {
            return Err(StoreError::ForeignKey("post"));
        }
        if !t.users.contains_key(&new.user_id) {
            return Err(StoreError::ForeignKey("user"));
        }
        let row = CommentRow {
            id: t.next_key(),
            public_id: new.public_id,
            content: new.content,
            post_id: new.post_id,
            user_id: new.user_id,
            created_at: OffsetDateTime::now_utc(),
        };
        t.comments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn comment_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CommentRow>> {
        self.enter().await?;
        let t = self.tables.read().await;
        Ok(t.comments.values().find(|c| &c.public_id == id).cloned())
    }

    async fn list_comments_by_post(&self, post: InternalKey) -> StoreResult<Vec<CommentView>> {
        self.enter().await?;
        let t = self.tables.read().await;
        t.comments
            .values()
            .filter(|c| c.post_id == post)
            .map(|c| t.comment_view(c))
            .collect()
    }

    async fn delete_comment(&self, key: InternalKey) -> StoreResult<u64> {
        self.enter().await?;
        let mut t = self.tables.write().await;
        Ok(t.comments.remove(&key).map_or(0, |_| 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            public_id: PublicId::generate(),
            username: name.into(),
            password_hash: "$argon2id$v=19$stub".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_username_conflicts_and_keeps_original() {
        let store = MemoryStore::new();
        let first = store.insert_user(new_user("alice")).await.unwrap();

        let err = store.insert_user(new_user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.public_id, first.public_id);
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn post_with_dangling_category_is_rejected() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("bob")).await.unwrap();
        let err = store
            .insert_post(NewPost {
                public_id: PublicId::generate(),
                title: "t".into(),
                content: "c".into(),
                user_id: user.id,
                category_id: InternalKey::new(999),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey("category")));
        assert!(store.list_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn category_with_posts_cannot_be_deleted() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("carol")).await.unwrap();
        let cat = store
            .insert_category(NewCategory {
                public_id: PublicId::generate(),
                name: "general".into(),
                description: String::new(),
                parent_id: None,
                created_by: user.id,
            })
            .await
            .unwrap();
        store
            .insert_post(NewPost {
                public_id: PublicId::generate(),
                title: "hello".into(),
                content: "world".into(),
                user_id: user.id,
                category_id: cat.id,
            })
            .await
            .unwrap();

        let err = store.delete_category(cat.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(1);
        assert!(store.list_users().await.unwrap_err().is_transient());
        assert!(store.list_users().await.is_ok());
        assert_eq!(store.calls(), 2);
    }

    async fn seed_categories(store: &MemoryStore, depth: usize) -> Vec<InternalKey> {
        let user = store.insert_user(new_user("dave")).await.unwrap();
        let mut keys: Vec<InternalKey> = Vec::new();
        for _ in 0..depth {
            let row = store
                .insert_category(NewCategory {
                    public_id: PublicId::generate(),
                    name: "c".into(),
                    description: String::new(),
                    parent_id: keys.last().copied(),
                    created_by: user.id,
                })
                .await
                .unwrap();
            keys.push(row.id);
        }
        keys
    }

    fn reparent(parent: Option<InternalKey>) -> CategoryChanges {
        CategoryChanges {
            name: "c".into(),
            description: String::new(),
            parent_id: parent,
        }
    }

    #[tokio::test]
    async fn reparenting_rejects_self_parent_and_cycles() {
        let store = MemoryStore::new();
        let keys = seed_categories(&store, 3).await;
        let (root, child, grandchild) = (keys[0], keys[1], keys[2]);

        let err = store.update_category(root, reparent(Some(root))).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(ref m) if m == SELF_PARENT));
        let err = store
            .update_category(root, reparent(Some(grandchild)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(ref m) if m == PARENT_CYCLE));
        let row = store.category_by_key(root).await.unwrap().unwrap();
        assert_eq!(row.parent_id, None);

        assert_eq!(store.update_category(grandchild, reparent(Some(root))).await.unwrap(), 1);
        assert_eq!(store.update_category(child, reparent(None)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_reparents_cannot_close_a_loop() {
        let store = MemoryStore::new();
        let keys = seed_categories(&store, 2).await;
        let (a, b) = (keys[0], keys[1]);
        store.update_category(b, reparent(None)).await.unwrap();
        store.set_latency(Duration::from_millis(20));

        let (first, second) = tokio::join!(
            store.update_category(a, reparent(Some(b))),
            store.update_category(b, reparent(Some(a))),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);

        store.set_latency(Duration::ZERO);
        let a_row = store.category_by_key(a).await.unwrap().unwrap();
        let b_row = store.category_by_key(b).await.unwrap().unwrap();
        assert!(!(a_row.parent_id == Some(b) && b_row.parent_id == Some(a)));
    }

    #[tokio::test]
    async fn counts_track_each_table() {
        let store = MemoryStore::new();
        seed_categories(&store, 2).await;
        let before = store.calls();
        let counts = store.counts().await;
        assert_eq!(
            counts,
            RowCounts {
                users: 1,
                categories: 2,
                posts: 0,
                comments: 0,
            }
        );
        assert_eq!(store.calls(), before);
    }
}
