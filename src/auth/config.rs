//! Immutable settings for the credential service.

use super::password::HashCost;
use super::token::{MAX_TOKEN_TTL, MIN_SECRET_LEN, TokenError, TokenIssuer};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

const DEFAULT_KEY_PREFIX: &str = "custodia";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 3000;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// What to do when recording the last-login timestamp fails after a
/// successful password check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LastLoginPolicy {
    /// Log a warning and return the tokens anyway.
    #[default]
    BestEffort,
    /// Fail the login.
    Required,
}

impl std::str::FromStr for LastLoginPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "required" => Ok(Self::Required),
            other => Err(format!("unknown last-login policy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    issuer: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    token_leeway_seconds: u64,
    key_prefix: String,
    store_timeout: Duration,
    last_login_policy: LastLoginPolicy,
    hash_cost: HashCost,
}

impl AuthConfig {
    /// Signing secret, issuer and both token lifetimes have no fallback and
    /// must be supplied by the caller.
    #[must_use]
    pub fn new(
        jwt_secret: SecretString,
        issuer: impl Into<String>,
        access_token_ttl: Duration,
        refresh_token_ttl: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            issuer: issuer.into(),
            access_token_ttl,
            refresh_token_ttl,
            token_leeway_seconds: 0,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            last_login_policy: LastLoginPolicy::default(),
            hash_cost: HashCost::default(),
        }
    }

    #[must_use]
    pub const fn with_token_leeway_seconds(mut self, seconds: u64) -> Self {
        self.token_leeway_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_last_login_policy(mut self, policy: LastLoginPolicy) -> Self {
        self.last_login_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub const fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub const fn token_leeway_seconds(&self) -> u64 {
        self.token_leeway_seconds
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub const fn last_login_policy(&self) -> LastLoginPolicy {
        self.last_login_policy
    }

    #[must_use]
    pub const fn hash_cost(&self) -> HashCost {
        self.hash_cost
    }

    /// Check the settings that have no sensible fallback.
    ///
    /// # Errors
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        let secret_len = self.jwt_secret.expose_secret().len();
        if secret_len < MIN_SECRET_LEN {
            return Err(format!(
                "jwt secret must be at least {MIN_SECRET_LEN} bytes, got {secret_len}"
            ));
        }
        if self.issuer.trim().is_empty() {
            return Err("jwt issuer must not be empty".to_string());
        }
        for ttl in [self.access_token_ttl, self.refresh_token_ttl] {
            if ttl < Duration::from_secs(1) || ttl > MAX_TOKEN_TTL {
                return Err(format!(
                    "token TTLs must be between 1 and {} seconds, got {}",
                    MAX_TOKEN_TTL.as_secs(),
                    ttl.as_secs()
                ));
            }
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err("refresh token TTL must not be shorter than access token TTL".to_string());
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return Err("cache prefix must be non-empty without whitespace".to_string());
        }
        if self.store_timeout.is_zero() {
            return Err("store timeout must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Build the token issuer these settings describe.
    ///
    /// # Errors
    /// `SecretTooShort` when the secret is under the minimum length.
    pub fn token_issuer(&self) -> Result<TokenIssuer, TokenError> {
        Ok(TokenIssuer::new(
            &self.jwt_secret,
            self.issuer.clone(),
            self.access_token_ttl,
            self.refresh_token_ttl,
        )?
        .with_leeway_seconds(self.token_leeway_seconds))
    }
}
