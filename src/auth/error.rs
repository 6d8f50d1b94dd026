use super::password::PasswordError;
use super::token::TokenError;
use crate::store::StoreError;
use thiserror::Error;

/// Coarse classification used by callers to pick a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Credential,
    NotFound,
    Token,
    Store,
    Timeout,
}

/// Why a login was refused. Never shown to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialFailure {
    UnknownEmail,
    WrongPassword,
    Disabled,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email address: {0}")]
    EmailInvalid(#[from] super::email::EmailError),
    #[error("password must be at least {min} characters")]
    PasswordTooWeak { min: usize },
    #[error("email already registered")]
    EmailAlreadyRegistered,
    #[error("invalid email or password")]
    InvalidCredentials { reason: CredentialFailure },
    #[error("user not found")]
    UserNotFound,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("refresh session not found or expired")]
    SessionNotFound,
    #[error("role not found")]
    RoleNotFound,
    #[error("role name already exists")]
    RoleNameTaken,
    #[error("role name must be 1 to 50 characters")]
    RoleNameInvalid,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("password processing failed")]
    Password(#[source] PasswordError),
    #[error("store operation failed")]
    Store(#[source] StoreError),
    #[error("store operation timed out")]
    StoreTimeout,
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmailInvalid(_)
            | Self::PasswordTooWeak { .. }
            | Self::RoleNameInvalid
            | Self::Password(PasswordError::EmptyInput) => ErrorKind::Validation,
            Self::EmailAlreadyRegistered | Self::RoleNameTaken => ErrorKind::Conflict,
            Self::InvalidCredentials { .. } | Self::AccountDisabled => ErrorKind::Credential,
            Self::UserNotFound | Self::SessionNotFound | Self::RoleNotFound => ErrorKind::NotFound,
            Self::Token(_) => ErrorKind::Token,
            Self::Password(_) | Self::Store(_) => ErrorKind::Store,
            Self::StoreTimeout => ErrorKind::Timeout,
        }
    }

    pub(crate) const fn credentials(reason: CredentialFailure) -> Self {
        Self::InvalidCredentials { reason }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::StoreTimeout,
            other => Self::Store(other),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Mismatch => Self::credentials(CredentialFailure::WrongPassword),
            other => Self::Password(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_share_a_kind_and_message() {
        let unknown = AuthError::credentials(CredentialFailure::UnknownEmail);
        let wrong = AuthError::from(PasswordError::Mismatch);
        assert_eq!(unknown.kind(), ErrorKind::Credential);
        assert_eq!(wrong.kind(), ErrorKind::Credential);
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[test]
    fn store_timeout_is_its_own_kind() {
        assert_eq!(AuthError::from(StoreError::Timeout).kind(), ErrorKind::Timeout);
        assert_eq!(AuthError::from(StoreError::Conflict).kind(), ErrorKind::Store);
    }

    #[test]
    fn store_details_stay_out_of_the_message() {
        let err = AuthError::from(StoreError::Backend(anyhow::anyhow!(
            "connection refused to 10.0.0.7"
        )));
        assert_eq!(err.to_string(), "store operation failed");
    }

    #[test]
    fn token_errors_keep_their_message() {
        let err = AuthError::from(TokenError::Expired);
        assert_eq!(err.kind(), ErrorKind::Token);
        assert_eq!(err.to_string(), "token expired");
    }
}
