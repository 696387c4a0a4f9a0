//! Credential store: usernames and password hashes keyed by internal id.
//!
//! Never sees a plaintext password. Hashing happens in the handlers before
//! anything reaches this module.

use tracing::info;

use crate::{
    error::{AppError, StoreError},
    ids::PublicId,
    store::{NewUser, RecordStore, UserRow},
};

/// Create a user with a freshly generated public id.
/// Fails with [`AppError::Conflict`] if the username is taken.
pub async fn create(
    store: &dyn RecordStore,
    username: &str,
    password_hash: &str,
) -> Result<UserRow, AppError> {
    let user = store
        .insert_user(NewUser {
            public_id: PublicId::generate(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => AppError::Conflict("username already taken".into()),
            other => other.into(),
        })?;
    info!(user_id = %user.public_id, "user created");
    Ok(user)
}

pub async fn find_by_username(store: &dyn RecordStore, username: &str) -> Result<UserRow, AppError> {
    store
        .user_by_username(username)
        .await?
        .ok_or(AppError::NotFound("user"))
}

pub async fn find_by_public_id(store: &dyn RecordStore, id: &PublicId) -> Result<UserRow, AppError> {
    if !id.is_well_formed() {
        return Err(AppError::NotFound("user"));
    }
    store
        .user_by_public_id(id)
        .await?
        .ok_or(AppError::NotFound("user"))
}
