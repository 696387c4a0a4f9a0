use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ids::PublicId, store::PostView};

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub title: String,
    pub content: String,
    pub category_id: PublicId,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: PublicId,
    pub title: String,
    pub content: String,
    pub author_id: PublicId,
    pub category_id: PublicId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<PostView> for PostResponse {
    fn from(v: PostView) -> Self {
        Self {
            id: v.public_id,
            title: v.title,
            content: v.content,
            author_id: v.author,
            category_id: v.category,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}
