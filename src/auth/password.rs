//! Password hashing with Argon2id.
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`), so the
//! cost used at hashing time travels with the hash and verification keeps
//! working if the configured cost changes later.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must not be empty")]
    EmptyInput,
    #[error("password hashing failed: {0}")]
    HashFailure(String),
    #[error("password does not match")]
    Mismatch,
    #[error("password verification failed: {0}")]
    VerificationFailure(String),
}

/// Argon2id work factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl HashCost {
    /// 19 MiB, 2 passes, 1 lane.
    pub const PRODUCTION: Self = Self {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
    };
}

impl Default for HashCost {
    fn default() -> Self {
        Self::PRODUCTION
    }
}

#[derive(Clone, Debug, Default)]
pub struct PasswordHasher {
    cost: HashCost,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl PasswordHasher {
    #[must_use]
    pub fn new(cost: HashCost) -> Self {
        Self {
            cost,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    #[must_use]
    pub const fn cost(&self) -> HashCost {
        self.cost
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.cost.memory_kib,
            self.cost.iterations,
            self.cost.parallelism,
            None,
        )
        .map_err(|err| PasswordError::HashFailure(err.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash `password` with a fresh random salt.
    ///
    /// # Errors
    /// `EmptyInput` for an empty password, `HashFailure` if Argon2 rejects the
    /// parameters or fails to produce a hash.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::EmptyInput);
        }
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| PasswordError::HashFailure(err.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check `password` against a stored PHC hash.
    ///
    /// The digest comparison inside `argon2` is constant-time.
    ///
    /// # Errors
    /// `Mismatch` when the password is wrong, `VerificationFailure` when the stored
    /// hash cannot be parsed or the hash computation itself fails.
    pub fn verify(&self, hash: &str, password: &str) -> Result<(), PasswordError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|err| PasswordError::VerificationFailure(err.to_string()))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(password_hash::Error::Password) => Err(PasswordError::Mismatch),
            Err(err) => Err(PasswordError::VerificationFailure(err.to_string())),
        }
    }

    /// Spend the same work as a real verification against a throwaway hash.
    ///
    /// Used when the account does not exist so unknown emails and wrong
    /// passwords take comparable time.
    pub fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hash("custodia-dummy-password").ok());
        if let Some(hash) = dummy {
            let _ = self.verify(hash, password);
        }
    }

    /// [`Self::hash`] on the blocking thread pool.
    ///
    /// # Errors
    /// Same as [`Self::hash`]; a panicked worker is reported as `HashFailure`.
    pub async fn hash_blocking(&self, password: String) -> Result<String, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| PasswordError::HashFailure(err.to_string()))?
    }

    /// [`Self::verify`] on the blocking thread pool.
    ///
    /// # Errors
    /// Same as [`Self::verify`]; a panicked worker is reported as `VerificationFailure`.
    pub async fn verify_blocking(&self, hash: String, password: String) -> Result<(), PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|err| PasswordError::VerificationFailure(err.to_string()))?
    }

    /// [`Self::verify_dummy`] on the blocking thread pool.
    pub async fn verify_dummy_blocking(&self, password: String) {
        let hasher = self.clone();
        let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await;
    }
}
