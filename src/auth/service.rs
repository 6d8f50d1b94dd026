//! Credential lifecycle: register, login, refresh, logout and bearer
//! authentication, composed from the hasher, the token issuer and the stores.
//!
//! A refresh token is live only while the session store maps
//! `<prefix>:refresh_token:<token>` to its user id. Refresh swaps that entry
//! for the new token's entry through [`SessionStore::rotate`]; logout deletes
//! it. Every store call runs under [`AuthConfig::store_timeout`].

use super::{
    config::{AuthConfig, LastLoginPolicy, MIN_PASSWORD_LEN},
    email,
    error::{AuthError, CredentialFailure},
    password::PasswordHasher,
    permissions::{self, EffectivePermissions},
    token::{TokenError, TokenIssuer, TokenKind},
};
use crate::model::{NewRole, NewUser, PublicUser, Role, User};
use crate::store::{
    IdentityStore, ProfileUpdate, RoleStore, SessionKeys, SessionStore, StoreError, StoreResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Tokens plus the sanitized user they were issued for.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct AuthSession {
    #[serde(flatten)]
    pub tokens: AuthTokens,
    pub user: PublicUser,
}

/// Authenticated caller with the roles resolved at authentication time.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: PublicUser,
    pub roles: Vec<Role>,
}

impl Principal {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    #[must_use]
    pub fn effective_permissions(&self) -> EffectivePermissions {
        permissions::effective_permissions(&self.roles)
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        permissions::has_permission(&self.roles, permission)
    }

    #[must_use]
    pub fn has_all_permissions<S: AsRef<str>>(&self, required: &[S]) -> bool {
        permissions::has_all_permissions(&self.roles, required)
    }

    #[must_use]
    pub fn missing_permissions<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        permissions::missing_permissions(&self.roles, required)
    }

    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, names: &[S]) -> bool {
        permissions::has_any_role(&self.roles, names)
    }

    #[must_use]
    pub fn has_all_roles<S: AsRef<str>>(&self, names: &[S]) -> bool {
        permissions::has_all_roles(&self.roles, names)
    }
}

pub struct CredentialService {
    config: AuthConfig,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    keys: SessionKeys,
    identities: Arc<dyn IdentityStore>,
    roles: Arc<dyn RoleStore>,
    sessions: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("tokens", &self.tokens)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl CredentialService {
    /// # Errors
    /// Returns `SecretTooShort` when the configured secret is too short to sign with.
    pub fn new(
        config: AuthConfig,
        identities: Arc<dyn IdentityStore>,
        roles: Arc<dyn RoleStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, TokenError> {
        let tokens = config.token_issuer()?;
        Ok(Self {
            hasher: PasswordHasher::new(config.hash_cost()),
            keys: SessionKeys::new(config.key_prefix()),
            tokens,
            config,
            identities,
            roles,
            sessions,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[must_use]
    pub const fn session_keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Run a store call under the configured deadline.
    async fn within<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.config.store_timeout(), op)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    fn issue_pair(&self, user: &User) -> Result<AuthTokens, AuthError> {
        Ok(AuthTokens {
            access_token: self.tokens.issue_access_token(user.id, &user.email)?,
            refresh_token: self.tokens.issue_refresh_token(user.id)?,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl().as_secs(),
        })
    }

    async fn open_session(&self, user: &User) -> Result<AuthTokens, AuthError> {
        let tokens = self.issue_pair(user)?;
        let key = self.keys.refresh_token(&tokens.refresh_token);
        self.within(self.sessions.set(
            &key,
            &user.id.to_string(),
            self.tokens.refresh_ttl(),
        ))
        .await?;
        Ok(tokens)
    }

    async fn live_user(&self, id: Uuid) -> Result<User, AuthError> {
        match self.within(self.identities.find_by_id(id)).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(AuthError::UserNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Create an account and open its first session.
    ///
    /// # Errors
    /// `EmailInvalid`, `PasswordTooWeak`, `EmailAlreadyRegistered`, or an
    /// infrastructure error. A failure after the user row is written leaves
    /// the account in place without a session.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthSession, AuthError> {
        email::validate(email)?;
        // Counted in characters, not bytes.
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooWeak {
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.within(self.identities.exists_by_email(email)).await? {
            return Err(AuthError::EmailAlreadyRegistered);
        }

        let password_hash = self.hasher.hash_blocking(password.to_string()).await?;
        let user = match self
            .within(self.identities.create_user(NewUser {
                email: email.to_string(),
                password_hash,
                name: name.to_string(),
                avatar_url: None,
            }))
            .await
        {
            Ok(user) => user,
            // Lost a race with a concurrent registration.
            Err(StoreError::Conflict) => return Err(AuthError::EmailAlreadyRegistered),
            Err(err) => return Err(err.into()),
        };

        let tokens = self.open_session(&user).await?;
        info!(user_id = %user.id, "User registered");

        Ok(AuthSession {
            tokens,
            user: user.to_public(),
        })
    }

    /// Verify a password and open a session.
    ///
    /// Unknown email, wrong password and disabled account all surface as
    /// `InvalidCredentials`.
    ///
    /// # Errors
    /// `InvalidCredentials` or an infrastructure error.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = match self.within(self.identities.find_by_email(email)).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                self.hasher.verify_dummy_blocking(password.to_string()).await;
                debug!("Login rejected: unknown email");
                return Err(AuthError::credentials(CredentialFailure::UnknownEmail));
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self
            .hasher
            .verify_blocking(user.password_hash.clone(), password.to_string())
            .await
        {
            debug!(user_id = %user.id, "Login rejected: {err}");
            return Err(err.into());
        }

        if !user.is_active {
            debug!(user_id = %user.id, "Login rejected: account disabled");
            return Err(AuthError::credentials(CredentialFailure::Disabled));
        }

        // Only `last_login_at` is written; the row read above may already be stale.
        let logged_in_at = Utc::now();
        let user = match self
            .within(self.identities.touch_last_login(user.id, logged_in_at))
            .await
        {
            Ok(()) => User {
                last_login_at: Some(logged_in_at),
                ..user
            },
            Err(StoreError::NotFound) => {
                debug!(user_id = %user.id, "Login rejected: account removed mid-login");
                return Err(AuthError::credentials(CredentialFailure::UnknownEmail));
            }
            Err(err) => match self.config.last_login_policy() {
                LastLoginPolicy::BestEffort => {
                    warn!(user_id = %user.id, "Failed to record last login: {err}");
                    user
                }
                LastLoginPolicy::Required => return Err(err.into()),
            },
        };

        let tokens = self.open_session(&user).await?;

        info!(user_id = %user.id, "User logged in");
        Ok(AuthSession {
            tokens,
            user: user.to_public(),
        })
    }

    /// Exchange a live refresh token for a new pair, retiring the old token.
    ///
    /// # Errors
    /// Token validation errors, `SessionNotFound` when the token is not (or
    /// no longer) live, `UserNotFound`, `AccountDisabled`, or an
    /// infrastructure error.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let claims = self
            .tokens
            .validate_kind(refresh_token, TokenKind::Refresh)?;

        let old_key = self.keys.refresh_token(refresh_token);
        let bound = match self.within(self.sessions.get(&old_key)).await {
            Ok(value) => value,
            Err(StoreError::NotFound) => return Err(AuthError::SessionNotFound),
            Err(err) => return Err(err.into()),
        };
        if bound != claims.user_id.to_string() {
            warn!(user_id = %claims.user_id, "Refresh session bound to a different user");
            return Err(AuthError::SessionNotFound);
        }

        let user = self.live_user(claims.user_id).await?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let tokens = self.issue_pair(&user)?;
        let new_key = self.keys.refresh_token(&tokens.refresh_token);
        let rotated = self
            .within(self.sessions.rotate(
                &old_key,
                &bound,
                &new_key,
                self.tokens.refresh_ttl(),
            ))
            .await?;
        if !rotated {
            debug!(user_id = %user.id, "Refresh lost rotation race");
            return Err(AuthError::SessionNotFound);
        }

        debug!(user_id = %user.id, "Refresh token rotated");
        Ok(AuthSession {
            tokens,
            user: user.to_public(),
        })
    }

    /// Retire a refresh token. Unknown, expired and garbage tokens are fine.
    ///
    /// # Errors
    /// Only infrastructure errors.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let key = self.keys.refresh_token(refresh_token);
        self.within(self.sessions.delete(&[key])).await?;
        Ok(())
    }

    /// Resolve a bearer access token into the current user and roles.
    ///
    /// The user is re-read on every call, so deactivation takes effect
    /// before the token expires. A failure to load roles is logged and
    /// treated as "no roles".
    ///
    /// # Errors
    /// Token validation errors, `UserNotFound`, `AccountDisabled`, or an
    /// infrastructure error.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal, AuthError> {
        let claims = self
            .tokens
            .validate_kind(access_token, TokenKind::Access)?;
        let user = self.live_user(claims.user_id).await?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let roles = match self.within(self.identities.user_roles(user.id)).await {
            Ok(roles) => roles,
            Err(err) => {
                warn!(user_id = %user.id, "Failed to load roles, continuing without: {err}");
                Vec::new()
            }
        };

        Ok(Principal {
            user: user.to_public(),
            roles,
        })
    }

    /// # Errors
    /// `UserNotFound` or an infrastructure error.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<PublicUser, AuthError> {
        match self
            .within(self.identities.update_profile(user_id, &update))
            .await
        {
            Ok(updated) => Ok(updated.to_public()),
            Err(StoreError::NotFound) => Err(AuthError::UserNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Soft delete the account and retire `refresh_token` if given.
    ///
    /// # Errors
    /// `UserNotFound` or an infrastructure error.
    #[instrument(skip(self, refresh_token))]
    pub async fn delete_account(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        match self.within(self.identities.delete_user(user_id)).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(AuthError::UserNotFound),
            Err(err) => return Err(err.into()),
        }
        if let Some(token) = refresh_token {
            self.logout(token).await?;
        }
        info!(%user_id, "Account deleted");
        Ok(())
    }

    /// # Errors
    /// `UserNotFound` or an infrastructure error.
    pub async fn find_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        Ok(self.live_user(user_id).await?.to_public())
    }

    /// Exact match on the stored address; deleted accounts are not found.
    ///
    /// # Errors
    /// `UserNotFound` or an infrastructure error.
    pub async fn find_user_by_email(&self, email: &str) -> Result<PublicUser, AuthError> {
        match self.within(self.identities.find_by_email(email)).await {
            Ok(user) => Ok(user.to_public()),
            Err(StoreError::NotFound) => Err(AuthError::UserNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// # Errors
    /// Infrastructure errors only.
    pub async fn list_users(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PublicUser>, i64), AuthError> {
        let (users, total) = self
            .within(self.identities.list_users(limit, offset))
            .await?;
        Ok((users.iter().map(User::to_public).collect(), total))
    }

    /// # Errors
    /// Infrastructure errors only.
    pub async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        Ok(self.within(self.roles.list_roles()).await?)
    }

    /// # Errors
    /// `RoleNameInvalid`, `RoleNameTaken`, or an infrastructure error.
    pub async fn create_role(&self, role: NewRole) -> Result<Role, AuthError> {
        let name = role.name.trim();
        if name.is_empty() || name.len() > 50 {
            return Err(AuthError::RoleNameInvalid);
        }
        let role = NewRole {
            name: name.to_string(),
            ..role
        };
        match self.within(self.roles.create_role(role)).await {
            Ok(role) => {
                info!(role_id = %role.id, role = %role.name, "Role created");
                Ok(role)
            }
            Err(StoreError::Conflict) => Err(AuthError::RoleNameTaken),
            Err(err) => Err(err.into()),
        }
    }

    /// # Errors
    /// `RoleNotFound` when the user or role does not exist, or an infrastructure error.
    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        self.live_user(user_id).await?;
        match self.within(self.roles.assign_to_user(user_id, role_id)).await {
            Ok(()) => {
                info!(%user_id, %role_id, "Role assigned");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(AuthError::RoleNotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// # Errors
    /// Infrastructure errors only.
    pub async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        self.within(self.roles.remove_from_user(user_id, role_id))
            .await?;
        info!(%user_id, %role_id, "Role removed");
        Ok(())
    }

    /// Reachability of the identity and session stores, in that order.
    pub async fn ping(&self) -> (Result<(), AuthError>, Result<(), AuthError>) {
        let identity = self.within(self.identities.ping()).await.map_err(Into::into);
        let session = self.within(self.sessions.ping()).await.map_err(Into::into);
        (identity, session)
    }
}
