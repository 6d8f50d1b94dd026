//! PostgreSQL stores (schema in `db/sql/custodia.sql`).
//!
//! Every statement runs inside a `db.query` span carrying the operation and
//! statement text. Session rotation is a single transaction:
//! `DELETE ... RETURNING` on the old key, then `INSERT` of the new one. Two
//! concurrent rotations of the same key serialize on the row lock and only
//! the first sees a row to delete.

use super::{IdentityStore, ProfileUpdate, RoleStore, SessionStore, StoreError, StoreResult};
use crate::model::{NewRole, NewUser, Permission, Role, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info_span, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, name, avatar_url, is_active, \
     email_verified_at, last_login_at, created_at, updated_at, deleted_at";

const ROLE_COLUMNS: &str = "id, name, description, permissions, created_at, updated_at";

/// Open a connection pool.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

fn query_span(operation: &str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn db_error(err: sqlx::Error, context: &'static str) -> StoreError {
    match StoreError::from(err) {
        StoreError::Backend(source) => StoreError::Backend(source.context(context)),
        other => other,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        avatar_url: row.try_get("avatar_url")?,
        is_active: row.try_get("is_active")?,
        email_verified_at: row.try_get("email_verified_at")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    let Json(raw): Json<Vec<String>> = row.try_get("permissions")?;
    let id: Uuid = row.try_get("id")?;
    let permissions = raw
        .into_iter()
        .filter_map(|value| match Permission::parse(&value) {
            Ok(permission) => Some(permission),
            Err(err) => {
                warn!(role_id = %id, "Skipping stored permission: {err}");
                None
            }
        })
        .collect();
    Ok(Role {
        id,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        permissions,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_strings(permissions: &[Permission]) -> Json<Vec<String>> {
    Json(permissions.iter().map(ToString::to_string).collect())
}

/// Users, roles and assignments in PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let query = format!(
            "INSERT INTO users (email, password_hash, name, avatar_url, is_active) \
             VALUES ($1, $2, $3, $4, TRUE) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.avatar_url)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| db_error(err, "failed to insert user"))?;
        user_from_row(&row).map_err(|err| db_error(err, "failed to decode user"))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to lookup user by id"))?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row).map_err(|err| db_error(err, "failed to decode user"))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to lookup user by email"))?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row).map_err(|err| db_error(err, "failed to decode user"))
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let query = format!(
            "UPDATE users SET email = $2, password_hash = $3, name = $4, avatar_url = $5, \
             is_active = $6, email_verified_at = $7, last_login_at = $8, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.avatar_url)
            .bind(user.is_active)
            .bind(user.email_verified_at)
            .bind(user.last_login_at)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(|err| db_error(err, "failed to update user"))?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row).map_err(|err| db_error(err, "failed to decode user"))
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let query = "UPDATE users SET last_login_at = $2, updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL";
        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error(err, "failed to record last login"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<User> {
        let query = format!(
            "UPDATE users SET name = COALESCE($2, name), \
             avatar_url = CASE WHEN $3::text IS NULL THEN avatar_url ELSE NULLIF($3, '') END, \
             updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&update.name)
            .bind(&update.avatar_url)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(|err| db_error(err, "failed to update profile"))?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row).map_err(|err| db_error(err, "failed to decode user"))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let query = "UPDATE users SET deleted_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| db_error(err, "failed to soft delete user"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        let query =
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL) AS present";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error(err, "failed to check email"))?;
        row.try_get("present")
            .map_err(|err| db_error(err, "failed to decode email check"))
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)> {
        let count_query = "SELECT COUNT(*) AS total FROM users WHERE deleted_at IS NULL";
        let total: i64 = sqlx::query(count_query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", count_query))
            .await
            .map_err(|err| db_error(err, "failed to count users"))?
            .try_get("total")
            .map_err(|err| db_error(err, "failed to decode user count"))?;

        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL \
             ORDER BY created_at, id LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&query)
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to list users"))?;
        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| db_error(err, "failed to decode user"))?;
        Ok((users, total))
    }

    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>> {
        let query = "SELECT r.id, r.name, r.description, r.permissions, r.created_at, r.updated_at \
                     FROM roles r JOIN user_roles ur ON ur.role_id = r.id \
                     WHERE ur.user_id = $1 ORDER BY r.name";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error(err, "failed to load user roles"))?;
        rows.iter()
            .map(role_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error(err, "identity store ping failed"))?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgIdentityStore {
    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        let query = format!(
            "INSERT INTO roles (name, description, permissions) VALUES ($1, $2, $3) \
             RETURNING {ROLE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&role.name)
            .bind(&role.description)
            .bind(permission_strings(&role.permissions))
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| db_error(err, "failed to insert role"))?;
        role_from_row(&row).map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Role> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to lookup role"))?
            .ok_or(StoreError::NotFound)?;
        role_from_row(&row).map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE LOWER(name) = LOWER($1)");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to lookup role by name"))?
            .ok_or(StoreError::NotFound)?;
        role_from_row(&row).map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn update_role(&self, role: &Role) -> StoreResult<Role> {
        let query = format!(
            "UPDATE roles SET name = $2, description = $3, permissions = $4, updated_at = NOW() \
             WHERE id = $1 RETURNING {ROLE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(role.id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(permission_strings(&role.permissions))
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(|err| db_error(err, "failed to update role"))?
            .ok_or(StoreError::NotFound)?;
        role_from_row(&row).map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        let query = "DELETE FROM roles WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error(err, "failed to delete role"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| db_error(err, "failed to list roles"))?;
        rows.iter()
            .map(role_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| db_error(err, "failed to decode role"))
    }

    async fn assign_to_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let query = "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) \
                     ON CONFLICT (user_id, role_id) DO NOTHING";
        match sqlx::query(query)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_foreign_key_violation(&err) => Err(StoreError::NotFound),
            Err(err) => Err(db_error(err, "failed to assign role")),
        }
    }

    async fn remove_from_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let query = "DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2";
        sqlx::query(query)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error(err, "failed to remove role"))?;
        Ok(())
    }
}

/// Session entries in the `session_entries` table.
///
/// Expired rows are filtered on read, so correctness does not depend on the
/// sweeper; it only keeps the table small.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired rows, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM session_entries WHERE expires_at <= NOW()";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge expired session entries")?;
        Ok(result.rows_affected())
    }

    /// Run [`Self::purge_expired`] every `interval` until the runtime stops.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Purged expired session entries"),
                    Err(err) => error!("Session sweeper failed: {err:#}"),
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let query = "INSERT INTO session_entries (key, value, expires_at) \
                     VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
                     expires_at = EXCLUDED.expires_at";
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| db_error(err, "failed to set session entry"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let query = "SELECT value FROM session_entries WHERE key = $1 AND expires_at > NOW()";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error(err, "failed to get session entry"))?
            .ok_or(StoreError::NotFound)?;
        row.try_get("value")
            .map_err(|err| db_error(err, "failed to decode session entry"))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let query = "DELETE FROM session_entries WHERE key = ANY($1)";
        sqlx::query(query)
            .bind(keys)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error(err, "failed to delete session entries"))?;
        Ok(())
    }

    async fn rotate(
        &self,
        old_key: &str,
        expected: &str,
        new_key: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_error(err, "begin rotation transaction"))?;

        let query = "DELETE FROM session_entries \
                     WHERE key = $1 AND value = $2 AND expires_at > NOW() RETURNING key";
        let removed = sqlx::query(query)
            .bind(old_key)
            .bind(expected)
            .fetch_optional(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| db_error(err, "failed to remove rotated session entry"))?;

        if removed.is_none() {
            let _ = tx.rollback().await;
            return Ok(false);
        }

        let query = "INSERT INTO session_entries (key, value, expires_at) \
                     VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
                     expires_at = EXCLUDED.expires_at";
        sqlx::query(query)
            .bind(new_key)
            .bind(expected)
            .bind(ttl.as_secs_f64())
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| db_error(err, "failed to insert rotated session entry"))?;

        tx.commit()
            .await
            .map_err(|err| db_error(err, "commit rotation transaction"))?;
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| db_error(err, "session store ping failed"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            db_error(sqlx::Error::RowNotFound, "lookup"),
            StoreError::NotFound
        ));
    }

    #[test]
    fn pool_timeout_maps_to_timeout() {
        assert!(matches!(
            db_error(sqlx::Error::PoolTimedOut, "lookup"),
            StoreError::Timeout
        ));
    }

    #[test]
    fn backend_errors_carry_context() {
        let err = db_error(sqlx::Error::PoolClosed, "failed to insert user");
        match err {
            StoreError::Backend(source) => {
                assert_eq!(source.to_string(), "failed to insert user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn permissions_serialize_as_plain_strings() -> anyhow::Result<()> {
        let perms = vec![Permission::wildcard(), Permission::parse("user:read")?];
        let Json(values) = permission_strings(&perms);
        assert_eq!(values, vec!["*".to_string(), "user:read".to_string()]);
        Ok(())
    }
}
