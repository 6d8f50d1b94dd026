//! # Custodia (credential lifecycle and access control)
//!
//! `custodia` registers users, verifies passwords, issues short-lived access
//! tokens with long-lived rotating refresh tokens, and resolves role-based
//! permissions for authenticated callers.
//!
//! ## Tokens
//!
//! Both token kinds are HS256 JWTs carrying `user_id`, `iss`, `iat`, `exp`, a
//! unique `jti` and a `typ` of `access` or `refresh`. A refresh token is only
//! usable while the session store still holds its entry; every refresh
//! replaces the entry, so a refresh token works once.
//!
//! ## Authorization
//!
//! Roles carry permission strings. The `*` permission grants everything.
//! Role name checks ignore case; permission checks do not.
//!
//! ## Storage
//!
//! Users and roles live in Postgres. Refresh sessions live in a key-value
//! store with per-key expiry, backed by Postgres or by process memory.

pub mod api;
pub mod auth;
pub mod cli;
pub mod model;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
