//! In-process stores.
//!
//! State sits behind a single `tokio::sync::Mutex` per store, so each
//! operation (including [`SessionStore::rotate`]) is serialized and atomic.

use super::{IdentityStore, ProfileUpdate, RoleStore, SessionStore, StoreError, StoreResult};
use crate::model::{NewRole, NewUser, Role, User, UserRole};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Directory {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    assignments: Vec<UserRole>,
}

impl Directory {
    fn live_user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|user| !user.is_deleted() && user.email == email)
    }

    fn live_user(&self, id: Uuid) -> StoreResult<&User> {
        self.users
            .get(&id)
            .filter(|user| !user.is_deleted())
            .ok_or(StoreError::NotFound)
    }

    fn live_user_mut(&mut self, id: Uuid) -> StoreResult<&mut User> {
        self.users
            .get_mut(&id)
            .filter(|user| !user.is_deleted())
            .ok_or(StoreError::NotFound)
    }

    fn role_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.roles
            .values()
            .any(|role| Some(role.id) != except && role.name.eq_ignore_ascii_case(name))
    }
}

/// Users, roles and assignments kept in memory.
#[derive(Default)]
pub struct MemoryIdentityStore {
    inner: Mutex<Directory>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut dir = self.inner.lock().await;
        if dir.live_user_by_email(&user.email).is_some() {
            return Err(StoreError::Conflict);
        }
        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            avatar_url: user.avatar_url,
            is_active: true,
            email_verified_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        dir.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        self.inner.lock().await.live_user(id).cloned()
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        self.inner
            .lock()
            .await
            .live_user_by_email(email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut dir = self.inner.lock().await;
        dir.live_user(user.id)?;
        if dir
            .live_user_by_email(&user.email)
            .is_some_and(|other| other.id != user.id)
        {
            return Err(StoreError::Conflict);
        }
        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        dir.users.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut dir = self.inner.lock().await;
        let user = dir.live_user_mut(id)?;
        user.last_login_at = Some(at);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<User> {
        let mut dir = self.inner.lock().await;
        let user = dir.live_user_mut(id)?;
        if let Some(name) = &update.name {
            user.name.clone_from(name);
        }
        if let Some(avatar_url) = &update.avatar_url {
            user.avatar_url = (!avatar_url.is_empty()).then(|| avatar_url.clone());
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut dir = self.inner.lock().await;
        let user = dir.live_user_mut(id)?;
        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        Ok(())
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.live_user_by_email(email).is_some())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)> {
        let dir = self.inner.lock().await;
        let mut live: Vec<&User> = dir.users.values().filter(|u| !u.is_deleted()).collect();
        live.sort_by_key(|user| (user.created_at, user.id));
        let total = i64::try_from(live.len()).unwrap_or(i64::MAX);
        let page = live
            .into_iter()
            .skip(usize::try_from(offset.max(0)).unwrap_or(usize::MAX))
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>> {
        let dir = self.inner.lock().await;
        let mut roles: Vec<Role> = dir
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| dir.roles.get(&a.role_id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryIdentityStore {
    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        let mut dir = self.inner.lock().await;
        if dir.role_name_taken(&role.name, None) {
            return Err(StoreError::Conflict);
        }
        let now = Utc::now();
        let record = Role {
            id: Uuid::new_v4(),
            name: role.name,
            description: role.description,
            permissions: role.permissions,
            created_at: now,
            updated_at: now,
        };
        dir.roles.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Role> {
        self.inner
            .lock()
            .await
            .roles
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role> {
        self.inner
            .lock()
            .await
            .roles
            .values()
            .find(|role| role.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_role(&self, role: &Role) -> StoreResult<Role> {
        let mut dir = self.inner.lock().await;
        if !dir.roles.contains_key(&role.id) {
            return Err(StoreError::NotFound);
        }
        if dir.role_name_taken(&role.name, Some(role.id)) {
            return Err(StoreError::Conflict);
        }
        let mut updated = role.clone();
        updated.updated_at = Utc::now();
        dir.roles.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        let mut dir = self.inner.lock().await;
        dir.roles.remove(&id).ok_or(StoreError::NotFound)?;
        dir.assignments.retain(|a| a.role_id != id);
        Ok(())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.inner.lock().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn assign_to_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let mut dir = self.inner.lock().await;
        if !dir.users.contains_key(&user_id) || !dir.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound);
        }
        if !dir
            .assignments
            .iter()
            .any(|a| a.user_id == user_id && a.role_id == role_id)
        {
            dir.assignments.push(UserRole {
                id: Uuid::new_v4(),
                user_id,
                role_id,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn remove_from_user(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .assignments
            .retain(|a| !(a.user_id == user_id && a.role_id == role_id));
        Ok(())
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Session entries with expiry, kept in memory.
///
/// Expired entries are dropped lazily on access and by [`Self::purge_expired`].
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry and return how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`Self::purge_expired`] every `interval` until the runtime stops.
    #[must_use]
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = self.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Purged expired session entries");
                }
            }
        })
    }
}

fn expiry(ttl: Duration) -> StoreResult<Instant> {
    Instant::now()
        .checked_add(ttl)
        .ok_or_else(|| StoreError::Backend(anyhow!("session ttl {ttl:?} is out of range")))
}

fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
    match entries.get(key) {
        Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
        Some(_) => {
            entries.remove(key);
            None
        }
        None => None,
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = expiry(ttl)?;
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        live_value(&mut *self.entries.lock().await, key).ok_or(StoreError::NotFound)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn rotate(
        &self,
        old_key: &str,
        expected: &str,
        new_key: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let expires_at = expiry(ttl)?;
        let mut entries = self.entries.lock().await;
        if live_value(&mut entries, old_key).as_deref() != Some(expected) {
            return Ok(false);
        }
        entries.remove(old_key);
        entries.insert(
            new_key.to_string(),
            Entry {
                value: expected.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Permission;
    use anyhow::Result;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: "Test".to_string(),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn email_unique_among_live_users() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let user = store.create_user(new_user("ada@example.com")).await?;
        assert!(matches!(
            store.create_user(new_user("ada@example.com")).await,
            Err(StoreError::Conflict)
        ));
        // Case-sensitive as stored.
        store.create_user(new_user("Ada@example.com")).await?;

        store.delete_user(user.id).await?;
        assert!(!store.exists_by_email("ada@example.com").await?);
        assert!(matches!(store.find_by_id(user.id).await, Err(StoreError::NotFound)));
        store.create_user(new_user("ada@example.com")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn targeted_updates_leave_other_columns() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let user = store.create_user(new_user("ada@example.com")).await?;
        let mut disabled = user.clone();
        disabled.is_active = false;
        store.update_user(&disabled).await?;

        let at = Utc::now();
        store.touch_last_login(user.id, at).await?;
        let touched = store.find_by_id(user.id).await?;
        assert!(!touched.is_active);
        assert_eq!(touched.last_login_at, Some(at));
        assert_eq!(touched.name, "Test");

        let updated = store
            .update_profile(
                user.id,
                &ProfileUpdate {
                    name: Some("Ada".to_string()),
                    avatar_url: Some("https://example.com/ada.png".to_string()),
                },
            )
            .await?;
        assert!(!updated.is_active);
        assert_eq!(updated.last_login_at, Some(at));
        assert_eq!(updated.name, "Ada");

        let cleared = store
            .update_profile(
                user.id,
                &ProfileUpdate {
                    name: None,
                    avatar_url: Some(String::new()),
                },
            )
            .await?;
        assert_eq!(cleared.name, "Ada");
        assert_eq!(cleared.avatar_url, None);

        store.delete_user(user.id).await?;
        assert!(matches!(
            store.touch_last_login(user.id, at).await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_users_paginates_live_users() -> Result<()> {
        let store = MemoryIdentityStore::new();
        for i in 0..5 {
            store.create_user(new_user(&format!("u{i}@example.com"))).await?;
        }
        let gone = store.find_by_email("u0@example.com").await?;
        store.delete_user(gone.id).await?;

        let (page, total) = store.list_users(2, 1).await?;
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn role_assignment_round_trip() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let user = store.create_user(new_user("ada@example.com")).await?;
        let role = store
            .create_role(NewRole {
                name: "Editor".to_string(),
                description: None,
                permissions: vec![Permission::parse("doc:write")?],
            })
            .await?;

        assert!(matches!(
            store
                .create_role(NewRole {
                    name: "editor".to_string(),
                    description: None,
                    permissions: vec![],
                })
                .await,
            Err(StoreError::Conflict)
        ));

        store.assign_to_user(user.id, role.id).await?;
        store.assign_to_user(user.id, role.id).await?;
        assert_eq!(store.user_roles(user.id).await?.len(), 1);
        assert_eq!(store.find_role_by_name("EDITOR").await?.id, role.id);

        store.remove_from_user(user.id, role.id).await?;
        assert!(store.user_roles(user.id).await?.is_empty());

        store.assign_to_user(user.id, role.id).await?;
        store.delete_role(role.id).await?;
        assert!(store.user_roles(user.id).await?.is_empty());
        assert!(matches!(
            store.assign_to_user(user.id, role.id).await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn session_entries_expire() -> Result<()> {
        let store = MemorySessionStore::new();
        store.set("k", "v", Duration::from_secs(60)).await?;
        assert_eq!(store.get("k").await?, "v");

        store.set("short", "v", Duration::ZERO).await?;
        assert!(matches!(store.get("short").await, Err(StoreError::NotFound)));

        store.delete(&["k".to_string(), "missing".to_string()]).await?;
        assert!(matches!(store.get("k").await, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn rotate_checks_binding() -> Result<()> {
        let store = MemorySessionStore::new();
        store.set("old", "user-1", Duration::from_secs(60)).await?;

        assert!(!store.rotate("old", "user-2", "new", Duration::from_secs(60)).await?);
        assert!(store.rotate("old", "user-1", "new", Duration::from_secs(60)).await?);
        assert!(!store.rotate("old", "user-1", "newer", Duration::from_secs(60)).await?);
        assert_eq!(store.get("new").await?, "user-1");
        assert!(matches!(store.get("old").await, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_an_error() -> Result<()> {
        let store = MemorySessionStore::new();
        let forever = Duration::from_secs(u64::MAX);
        assert!(matches!(
            store.set("k", "v", forever).await,
            Err(StoreError::Backend(_))
        ));
        assert!(store.is_empty().await);

        store.set("old", "user-1", Duration::from_secs(60)).await?;
        assert!(matches!(
            store.rotate("old", "user-1", "new", forever).await,
            Err(StoreError::Backend(_))
        ));
        assert_eq!(store.get("old").await?, "user-1");
        Ok(())
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() -> Result<()> {
        let store = MemorySessionStore::new();
        store.set("a", "1", Duration::ZERO).await?;
        store.set("b", "2", Duration::from_secs(60)).await?;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        Ok(())
    }
}
