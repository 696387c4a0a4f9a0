use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ids::PublicId, store::CommentView};

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub post_id: PublicId,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: PublicId,
    pub content: String,
    pub post_id: PublicId,
    pub author_id: PublicId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<CommentView> for CommentResponse {
    fn from(v: CommentView) -> Self {
        Self {
            id: v.public_id,
            content: v.content,
            post_id: v.post,
            author_id: v.author,
            created_at: v.created_at,
        }
    }
}
