//! Identity and role records shared by the stores, the credential service and
//! the HTTP surface.
//!
//! `User` carries the password hash and deliberately does not implement
//! `Serialize`; anything leaving the process goes through [`PublicUser`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Stored identity record.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Sanitized copy safe to hand to callers.
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            is_active: self.is_active,
            email_verified_at: self.email_verified_at,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("name", &self.name)
            .field("avatar_url", &self.avatar_url)
            .field("is_active", &self.is_active)
            .field("last_login_at", &self.last_login_at)
            .field("deleted_at", &self.deleted_at)
            .finish_non_exhaustive()
    }
}

/// User representation returned to callers; never contains the password hash.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        user.to_public()
    }
}

/// Fields required to persist a new user.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid permission {0:?}: must be non-empty and contain no whitespace")]
pub struct InvalidPermission(pub String);

/// Opaque capability name such as `workflow:read`.
///
/// The catalog is open; the only reserved value is [`Permission::WILDCARD`],
/// which grants every permission.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "workflow:read")]
pub struct Permission(String);

impl Permission {
    pub const WILDCARD: &'static str = "*";

    /// # Errors
    /// Returns [`InvalidPermission`] for empty values or values containing whitespace.
    pub fn parse(value: &str) -> Result<Self, InvalidPermission> {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(InvalidPermission(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// The grant-everything sentinel.
    #[must_use]
    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Permission {
    type Error = InvalidPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

impl AsRef<str> for Permission {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named permission bundle.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// True when this role alone grants `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        crate::auth::permissions::has_permission(std::slice::from_ref(self), permission)
    }

    /// True when this role alone grants every permission in `permissions`.
    #[must_use]
    pub fn has_all_permissions<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        crate::auth::permissions::has_all_permissions(std::slice::from_ref(self), permissions)
    }
}

/// Fields required to persist a new role.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Assignment of a role to a user.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            name: "Ada".to_string(),
            avatar_url: None,
            is_active: true,
            email_verified_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn public_user_never_serializes_password_hash() -> Result<()> {
        let user = sample_user();
        let value = serde_json::to_value(user.to_public())?;
        let text = value.to_string();
        assert!(!text.contains("argon2id"));
        assert!(value.get("password_hash").is_none());
        assert_eq!(
            value.get("email").and_then(serde_json::Value::as_str),
            Some("ada@example.com")
        );
        Ok(())
    }

    #[test]
    fn debug_output_masks_password_hash() {
        let rendered = format!("{:?}", sample_user());
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("argon2id"));
    }

    #[test]
    fn permission_rejects_empty_and_whitespace() {
        assert!(Permission::parse("").is_err());
        assert!(Permission::parse("workflow read").is_err());
        assert!(Permission::parse("workflow:read").is_ok());
        assert!(Permission::wildcard().is_wildcard());
    }

    #[test]
    fn permission_deserialization_validates() {
        let ok: Result<Vec<Permission>, _> = serde_json::from_str(r#"["*", "user:read"]"#);
        assert!(ok.is_ok());
        let bad: Result<Vec<Permission>, _> = serde_json::from_str(r#"["user read"]"#);
        assert!(bad.is_err());
    }
}
