//! Storage contracts consumed by the credential service.
//!
//! - [`IdentityStore`]: durable users and the user-to-role join.
//! - [`RoleStore`]: role administration.
//! - [`SessionStore`]: key-value entries with per-key expiry, used to record
//!   which refresh tokens are still live.
//!
//! Implementations live in [`memory`] (tests, single-node development) and
//! [`postgres`]. Every operation reports "absent" as [`StoreError::NotFound`],
//! distinct from infrastructure failures.

pub mod keys;
pub mod memory;
pub mod postgres;

pub use keys::SessionKeys;

use crate::model::{NewRole, NewUser, Role, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    #[error("store deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut => Self::Timeout,
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                Self::Conflict
            }
            other => Self::Backend(anyhow::Error::new(other)),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Profile fields a user may change about themselves.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new active user. `Conflict` when a live user already has the email.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Soft-deleted users are reported as `NotFound`.
    async fn find_by_id(&self, id: Uuid) -> StoreResult<User>;

    /// Exact, case-sensitive match among live users.
    async fn find_by_email(&self, email: &str) -> StoreResult<User>;

    /// Persist every mutable field of `user` and bump `updated_at`.
    ///
    /// This overwrites the whole row from `user`; flows that only own one or
    /// two columns use [`Self::touch_last_login`] or [`Self::update_profile`].
    async fn update_user(&self, user: &User) -> StoreResult<User>;

    /// Set `last_login_at` and bump `updated_at`. No other column changes.
    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Apply the fields present in `update` and bump `updated_at`. An empty
    /// `avatar_url` clears it. No other column changes.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<User>;

    /// Soft delete.
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool>;

    /// Live users ordered by creation time, plus the total live count.
    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)>;

    /// Roles assigned to the user, ordered by name.
    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>>;

    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// `Conflict` when the name is taken.
    async fn create_role(&self, role: NewRole) -> StoreResult<Role>;

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Role>;

    /// Case-insensitive lookup.
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role>;

    async fn update_role(&self, role: &Role) -> StoreResult<Role>;

    /// Removes the role and every assignment of it.
    async fn delete_role(&self, id: Uuid) -> StoreResult<()>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    /// Idempotent. `NotFound` when either side does not exist.
    async fn assign_to_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;

    /// Idempotent.
    async fn remove_from_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite `key` with a fresh expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// `NotFound` for missing and expired keys alike.
    async fn get(&self, key: &str) -> StoreResult<String>;

    /// Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> StoreResult<()>;

    /// Replace `old_key` with `new_key` only if `old_key` still maps to
    /// `expected`. Returns `false` when the old entry was already gone or
    /// bound to something else.
    ///
    /// This default is a read, a delete and a write with no isolation between
    /// them, so two callers racing on the same `old_key` can both succeed.
    /// Stores that can do better override it.
    async fn rotate(
        &self,
        old_key: &str,
        expected: &str,
        new_key: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        match self.get(old_key).await {
            Ok(value) if value == expected => {}
            Ok(_) | Err(StoreError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        }
        self.delete(&[old_key.to_string()]).await?;
        self.set(new_key, expected, ttl).await?;
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()>;
}
