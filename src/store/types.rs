//! Store-facing projections.
//!
//! `*Row` types carry internal keys and are only ever handed between the
//! record store and the resolver/handlers. `*View` types are the joined,
//! public-id-only projections that response DTOs are built from. None of
//! these derive `Serialize`.

use time::OffsetDateTime;

use crate::ids::{InternalKey, PublicId};

/// User record. `password_hash` is an encoded Argon2 hash, never plaintext.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: InternalKey,
    pub public_id: PublicId,
    pub username: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub public_id: PublicId,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct CategoryRow {
    pub id: InternalKey,
    pub public_id: PublicId,
    pub name: String,
    pub description: String,
    pub parent_id: Option<InternalKey>,
    pub created_by: InternalKey,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub public_id: PublicId,
    pub name: String,
    pub description: String,
    pub parent_id: Option<InternalKey>,
    pub created_by: InternalKey,
}

#[derive(Debug, Clone)]
pub struct CategoryChanges {
    pub name: String,
    pub description: String,
    pub parent_id: Option<InternalKey>,
}

/// Category with its parent and creator expressed as public ids.
#[derive(Debug, Clone)]
pub struct CategoryView {
    pub public_id: PublicId,
    pub name: String,
    pub description: String,
    pub parent: Option<PublicId>,
    pub created_by: PublicId,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: InternalKey,
    pub public_id: PublicId,
    pub title: String,
    pub content: String,
    pub user_id: InternalKey,
    pub category_id: InternalKey,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub public_id: PublicId,
    pub title: String,
    pub content: String,
    pub user_id: InternalKey,
    pub category_id: InternalKey,
}

#[derive(Debug, Clone)]
pub struct PostChanges {
    pub title: String,
    pub content: String,
    pub category_id: InternalKey,
}

#[derive(Debug, Clone)]
pub struct PostView {
    pub public_id: PublicId,
    pub title: String,
    pub content: String,
    pub author: PublicId,
    pub category: PublicId,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: InternalKey,
    pub public_id: PublicId,
    pub content: String,
    pub post_id: InternalKey,
    pub user_id: InternalKey,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub public_id: PublicId,
    pub content: String,
    pub post_id: InternalKey,
    pub user_id: InternalKey,
}

#[derive(Debug, Clone)]
pub struct CommentView {
    pub public_id: PublicId,
    pub content: String,
    pub post: PublicId,
    pub author: PublicId,
    pub created_at: OffsetDateTime,
}
