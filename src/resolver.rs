//! Translate caller-supplied public ids into internal keys before a write.
//!
//! Handlers resolve every reference a write names, then build the
//! internal-key write. The first reference that does not resolve aborts the
//! whole operation with [`AppError::UnresolvedReference`] naming it, before
//! anything is written. Nothing is cached between requests.

use tracing::debug;

use crate::{
    error::AppError,
    ids::{InternalKey, PublicId},
    store::RecordStore,
};

pub struct Resolver<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    pub async fn user(&self, id: &PublicId) -> Result<InternalKey, AppError> {
        if id.is_well_formed() {
            if let Some(row) = self.store.user_by_public_id(id).await? {
                return Ok(row.id);
            }
        }
        Err(unresolved("user", id))
    }

    pub async fn category(&self, id: &PublicId) -> Result<InternalKey, AppError> {
        self.category_as("category", id).await
    }

    pub async fn parent_category(&self, id: Option<&PublicId>) -> Result<Option<InternalKey>, AppError> {
        match id {
            Some(id) => self.category_as("parent category", id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn post(&self, id: &PublicId) -> Result<InternalKey, AppError> {
        if id.is_well_formed() {
            if let Some(row) = self.store.post_by_public_id(id).await? {
                return Ok(row.id);
            }
        }
        Err(unresolved("post", id))
    }

    pub async fn comment(&self, id: &PublicId) -> Result<InternalKey, AppError> {
        if id.is_well_formed() {
            if let Some(row) = self.store.comment_by_public_id(id).await? {
                return Ok(row.id);
            }
        }
        Err(unresolved("comment", id))
    }

    async fn category_as(&self, what: &'static str, id: &PublicId) -> Result<InternalKey, AppError> {
        if id.is_well_formed() {
            if let Some(row) = self.store.category_by_public_id(id).await? {
                return Ok(row.id);
            }
        }
        Err(unresolved(what, id))
    }
}

fn unresolved(what: &'static str, id: &PublicId) -> AppError {
    debug!(reference = what, public_id = %id, "reference did not resolve");
    AppError::UnresolvedReference(what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewUser};

    async fn seed_user(store: &MemoryStore) -> (PublicId, InternalKey) {
        let row = store
            .insert_user(NewUser {
                public_id: PublicId::generate(),
                username: "alice".into(),
                password_hash: "hash".into(),
            })
            .await
            .unwrap();
        (row.public_id, row.id)
    }

    #[tokio::test]
    async fn resolution_is_stable() {
        let store = MemoryStore::new();
        let (public, key) = seed_user(&store).await;
        let resolver = Resolver::new(&store);
        for _ in 0..3 {
            assert_eq!(resolver.user(&public).await.unwrap(), key);
        }
    }

    #[tokio::test]
    async fn unknown_reference_names_entity() {
        let store = MemoryStore::new();
        let resolver = Resolver::new(&store);
        let err = resolver.category(&PublicId::generate()).await.unwrap_err();
        assert_eq!(err.to_string(), "category not found");
        let err = resolver
            .parent_category(Some(&PublicId::generate()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "parent category not found");
        assert!(resolver.parent_category(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_ids_skip_the_store() {
        let store = MemoryStore::new();
        let resolver = Resolver::new(&store);
        assert!(resolver.post(&PublicId::from("17")).await.is_err());
        assert_eq!(store.calls(), 0);
    }
}
