use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ids::PublicId, store::CategoryView};

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<PublicId>,
}

#[derive(Debug, Serialize)]
pub struct CategoryResponse {
    pub id: PublicId,
    pub name: String,
    pub description: String,
    pub parent_id: Option<PublicId>,
    pub created_by: PublicId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<CategoryView> for CategoryResponse {
    fn from(v: CategoryView) -> Self {
        Self {
            id: v.public_id,
            name: v.name,
            description: v.description,
            parent_id: v.parent,
            created_by: v.created_by,
            created_at: v.created_at,
        }
    }
}
