use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::{
    CategoryChanges, CategoryRow, CategoryView, CommentRow, CommentView, NewCategory, NewComment,
    NewPost, NewUser, PostChanges, PostRow, PostView, RecordStore, StoreResult, UserRow,
    PARENT_CYCLE, SELF_PARENT,
};
use crate::{
    error::StoreError,
    ids::{InternalKey, PublicId},
};

/// Postgres-backed record store. Writes run in a transaction whose
/// `statement_timeout` is whatever is left of the caller's bound, so a write
/// the caller has given up on is cancelled server side as well.
///
/// The bound covers statements, not the round trip: a COMMIT that lands just
/// as the caller's timer fires is reported as a timeout although the write
/// is durable. Callers treat a timed-out write as "outcome unknown".
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    budget: Duration,
}

impl PgStore {
    pub fn new(db: PgPool, timeout_ms: u64) -> Self {
        Self {
            db,
            budget: Duration::from_millis(timeout_ms),
        }
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.begin_at(Instant::now()).await
    }

    async fn begin_at(&self, started: Instant) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await.map_err(map_err)?;
        self.limit(&mut tx, started).await?;
        Ok(tx)
    }

    /// Shrink `statement_timeout` to the part of the budget not yet spent
    /// since `started`.
    async fn limit(&self, tx: &mut Transaction<'static, Postgres>, started: Instant) -> StoreResult<()> {
        let remaining = remaining_budget(self.budget, started.elapsed()).ok_or(StoreError::Timeout)?;
        let set_timeout = format!("SET LOCAL statement_timeout = {}", remaining.as_millis());
        sqlx::query(&set_timeout)
            .execute(&mut **tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

/// What is left of `budget` after `elapsed`, in whole milliseconds. `None`
/// once less than a millisecond remains, since `statement_timeout = 0`
/// would disable the limit.
fn remaining_budget(budget: Duration, elapsed: Duration) -> Option<Duration> {
    let left = budget.checked_sub(elapsed)?;
    let ms = left.as_millis() as u64;
    (ms > 0).then(|| Duration::from_millis(ms))
}

// --- row mapping ---

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CategoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            parent_id: row.try_get("parent_id")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CategoryView {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            public_id: row.try_get("public_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            parent: row.try_get("parent_public_id")?,
            created_by: row.try_get("creator_public_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for PostRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            user_id: row.try_get("user_id")?,
            category_id: row.try_get("category_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for PostView {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            public_id: row.try_get("public_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            author: row.try_get("author_public_id")?,
            category: row.try_get("category_public_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CommentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            content: row.try_get("content")?,
            post_id: row.try_get("post_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CommentView {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            public_id: row.try_get("public_id")?,
            content: row.try_get("content")?,
            post: row.try_get("post_public_id")?,
            author: row.try_get("author_public_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// --- error mapping ---

fn map_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StoreError::Conflict(unique_message(db.constraint())),
            Some("23503") => StoreError::ForeignKey(referenced_entity(db.constraint())),
            // query_canceled, raised by statement_timeout
            Some("57014") => StoreError::Timeout,
            _ => StoreError::Backend(db.to_string()),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn unique_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("users_username_key") => "username already taken".into(),
        _ => "record already exists".into(),
    }
}

fn referenced_entity(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("posts_user_id_fkey") | Some("comments_user_id_fkey") => "user",
        Some("categories_created_by_fkey") => "user",
        Some("posts_category_id_fkey") => "category",
        Some("categories_parent_id_fkey") => "parent category",
        Some("comments_post_id_fkey") => "post",
        _ => "record",
    }
}

const CATEGORY_VIEW: &str = r#"
    SELECT c.public_id, c.name, c.description, c.created_at,
           pc.public_id AS parent_public_id,
           u.public_id  AS creator_public_id
      FROM categories c
      JOIN users u ON u.id = c.created_by
 LEFT JOIN categories pc ON pc.id = c.parent_id
"#;

const POST_VIEW: &str = r#"
    SELECT p.public_id, p.title, p.content, p.created_at, p.updated_at,
           u.public_id AS author_public_id,
           c.public_id AS category_public_id
      FROM posts p
      JOIN users u ON u.id = p.user_id
      JOIN categories c ON c.id = p.category_id
"#;

const COMMENT_VIEW: &str = r#"
    SELECT cm.public_id, cm.content, cm.created_at,
           p.public_id AS post_public_id,
           u.public_id AS author_public_id
      FROM comments cm
      JOIN posts p ON p.id = cm.post_id
      JOIN users u ON u.id = cm.user_id
"#;

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_user(&self, new: NewUser) -> StoreResult<UserRow> {
        let mut tx = self.begin().await?;
        let user = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (public_id, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, public_id, username, password_hash, created_at
            "#,
        )
        .bind(&new.public_id)
        .bind(&new.username)
        .bind(&new.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        debug!(public_id = %user.public_id, "user row inserted");
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, public_id, username, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn user_by_public_id(&self, id: &PublicId) -> StoreResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, public_id, username, password_hash, created_at
            FROM users
            WHERE public_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, public_id, username, password_hash, created_at
            FROM users
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .map_err(map_err)
    }

    async fn insert_category(&self, new: NewCategory) -> StoreResult<CategoryRow> {
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            INSERT INTO categories (public_id, name, description, parent_id, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, public_id, name, description, parent_id, created_by, created_at
            "#,
        )
        .bind(&new.public_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.parent_id)
        .bind(new.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(row)
    }

    async fn category_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CategoryRow>> {
        sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, public_id, name, description, parent_id, created_by, created_at
            FROM categories
            WHERE public_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn category_by_key(&self, key: InternalKey) -> StoreResult<Option<CategoryRow>> {
        sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, public_id, name, description, parent_id, created_by, created_at
            FROM categories
            WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn category_view(&self, id: &PublicId) -> StoreResult<Option<CategoryView>> {
        let sql = format!("{CATEGORY_VIEW} WHERE c.public_id = $1");
        sqlx::query_as::<_, CategoryView>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_err)
    }

    async fn list_categories(&self) -> StoreResult<Vec<CategoryView>> {
        let sql = format!("{CATEGORY_VIEW} ORDER BY c.name ASC");
        sqlx::query_as::<_, CategoryView>(&sql)
            .fetch_all(&self.db)
            .await
            .map_err(map_err)
    }

    async fn update_category(&self, key: InternalKey, changes: CategoryChanges) -> StoreResult<u64> {
        let started = Instant::now();
        let mut tx = self.begin_at(started).await?;
        if let Some(parent) = changes.parent_id {
            if parent == key {
                return Err(StoreError::Invalid(SELF_PARENT.into()));
            }
            // serialises reparenting so two updates cannot each pass the
            // check below and together close a loop
            sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtext('categories.parent_id'))"#)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            let closes_loop: bool = sqlx::query_scalar(
                r#"
                WITH RECURSIVE chain(id) AS (
                    SELECT $1::bigint
                    UNION
                    SELECT c.parent_id
                      FROM categories c
                      JOIN chain ON c.id = chain.id
                     WHERE c.parent_id IS NOT NULL
                )
                SELECT EXISTS (SELECT 1 FROM chain WHERE id = $2)
                "#,
            )
            .bind(parent)
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;
            if closes_loop {
                debug!(category = key.get(), parent = parent.get(), "reparent rejected");
                return Err(StoreError::Invalid(PARENT_CYCLE.into()));
            }
            self.limit(&mut tx, started).await?;
        }
        let result = sqlx::query(
            r#"
            UPDATE categories
               SET name = $1, description = $2, parent_id = $3
             WHERE id = $4
            "#,
        )
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(changes.parent_id)
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_category(&self, key: InternalKey) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(r#"DELETE FROM categories WHERE id = $1"#)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|e| match map_err(e) {
                StoreError::ForeignKey(_) => {
                    StoreError::Conflict("category still has posts".into())
                }
                other => other,
            })?;
        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_post(&self, new: NewPost) -> StoreResult<PostRow> {
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (public_id, title, content, user_id, category_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, public_id, title, content, user_id, category_id, created_at, updated_at
            "#,
        )
        .bind(&new.public_id)
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.user_id)
        .bind(new.category_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(row)
    }

    async fn post_by_public_id(&self, id: &PublicId) -> StoreResult<Option<PostRow>> {
        sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, public_id, title, content, user_id, category_id, created_at, updated_at
            FROM posts
            WHERE public_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn post_view(&self, id: &PublicId) -> StoreResult<Option<PostView>> {
        let sql = format!("{POST_VIEW} WHERE p.public_id = $1");
        sqlx::query_as::<_, PostView>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_err)
    }

    async fn list_posts(&self) -> StoreResult<Vec<PostView>> {
        let sql = format!("{POST_VIEW} ORDER BY p.created_at DESC");
        sqlx::query_as::<_, PostView>(&sql)
            .fetch_all(&self.db)
            .await
            .map_err(map_err)
    }

    async fn list_posts_by_category(&self, category: InternalKey) -> StoreResult<Vec<PostView>> {
        let sql = format!("{POST_VIEW} WHERE p.category_id = $1 ORDER BY p.created_at DESC");
        sqlx::query_as::<_, PostView>(&sql)
            .bind(category)
            .fetch_all(&self.db)
            .await
            .map_err(map_err)
    }

    async fn update_post(&self, key: InternalKey, changes: PostChanges) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE posts
               SET title = $1, content = $2, category_id = $3, updated_at = now()
             WHERE id = $4
            "#,
        )
        .bind(&changes.title)
        .bind(&changes.content)
        .bind(changes.category_id)
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_post(&self, key: InternalKey) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(r#"DELETE FROM posts WHERE id = $1"#)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_comment(&self, new: NewComment) -> StoreResult<CommentRow> {
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (public_id, content, post_id, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, public_id, content, post_id, user_id, created_at
            "#,
        )
        .bind(&new.public_id)
        .bind(&new.content)
        .bind(new.post_id)
        .bind(new.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(row)
    }

    async fn comment_by_public_id(&self, id: &PublicId) -> StoreResult<Option<CommentRow>> {
        sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, public_id, content, post_id, user_id, created_at
            FROM comments
            WHERE public_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)
    }

    async fn list_comments_by_post(&self, post: InternalKey) -> StoreResult<Vec<CommentView>> {
        let sql = format!("{COMMENT_VIEW} WHERE cm.post_id = $1 ORDER BY cm.created_at ASC");
        sqlx::query_as::<_, CommentView>(&sql)
            .bind(post)
            .fetch_all(&self.db)
            .await
            .map_err(map_err)
    }

    async fn delete_comment(&self, key: InternalKey) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(r#"DELETE FROM comments WHERE id = $1"#)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_transient() {
        assert!(map_err(sqlx::Error::PoolTimedOut).is_transient());
        assert!(map_err(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn row_not_found_is_not_found() {
        assert!(matches!(map_err(sqlx::Error::RowNotFound), StoreError::NotFound));
    }

    #[test]
    fn foreign_keys_name_the_referenced_entity() {
        assert_eq!(referenced_entity(Some("posts_category_id_fkey")), "category");
        assert_eq!(referenced_entity(Some("comments_post_id_fkey")), "post");
        assert_eq!(referenced_entity(Some("posts_user_id_fkey")), "user");
        assert_eq!(referenced_entity(None), "record");
    }

    #[test]
    fn duplicate_username_message() {
        assert_eq!(unique_message(Some("users_username_key")), "username already taken");
    }

    #[test]
    fn statement_timeout_shrinks_with_elapsed_time() {
        let budget = Duration::from_millis(5_000);
        assert_eq!(
            remaining_budget(budget, Duration::from_millis(1_200)),
            Some(Duration::from_millis(3_800))
        );
        assert_eq!(remaining_budget(budget, Duration::ZERO), Some(budget));
        assert_eq!(remaining_budget(budget, Duration::from_micros(4_999_500)), None);
        assert_eq!(remaining_budget(budget, Duration::from_secs(6)), None);
    }
}
