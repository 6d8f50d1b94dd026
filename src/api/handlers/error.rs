//! Map credential errors onto HTTP responses.
//!
//! Credential and token failures collapse into fixed messages so responses
//! never reveal whether an email exists or why a token was refused.

use crate::auth::{AuthError, ErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const ACCOUNT_DISABLED: &str = "Account is disabled";
pub const INVALID_TOKEN: &str = "Invalid or expired token";
pub const INTERNAL_ERROR: &str = "Internal server error";
const UNAVAILABLE: &str = "Service temporarily unavailable";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Status and public message for an error.
#[must_use]
pub fn status_for(err: &AuthError) -> (StatusCode, String) {
    match err {
        AuthError::AccountDisabled => (StatusCode::FORBIDDEN, ACCOUNT_DISABLED.to_string()),
        AuthError::SessionNotFound => (StatusCode::UNAUTHORIZED, INVALID_TOKEN.to_string()),
        _ => match err.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, err.to_string()),
            ErrorKind::Conflict => (StatusCode::CONFLICT, err.to_string()),
            ErrorKind::Credential => (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()),
            ErrorKind::Token => (StatusCode::UNAUTHORIZED, INVALID_TOKEN.to_string()),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
            ErrorKind::Timeout => (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE.to_string()),
            ErrorKind::Store => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string()),
        },
    }
}

/// Log server-side failures and render the error.
pub fn error_response(err: &AuthError) -> Response {
    let (status, message) = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {err:?}");
    }
    json_error(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialFailure, TokenError};
    use crate::store::StoreError;

    #[test]
    fn credential_failures_look_identical() {
        let unknown = status_for(&AuthError::InvalidCredentials {
            reason: CredentialFailure::UnknownEmail,
        });
        let disabled = status_for(&AuthError::InvalidCredentials {
            reason: CredentialFailure::Disabled,
        });
        assert_eq!(unknown, disabled);
        assert_eq!(unknown.0, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.1, INVALID_CREDENTIALS);
    }

    #[test]
    fn token_failures_share_a_message() {
        let expired = status_for(&AuthError::Token(TokenError::Expired));
        let missing = status_for(&AuthError::SessionNotFound);
        assert_eq!(expired, missing);
        assert_eq!(expired.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(
            status_for(&AuthError::EmailAlreadyRegistered).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AuthError::PasswordTooWeak { min: 8 }).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AuthError::UserNotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(status_for(&AuthError::AccountDisabled).0, StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&AuthError::StoreTimeout).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn store_failures_hide_details() {
        let (status, message) = status_for(&AuthError::from(StoreError::Backend(
            anyhow::anyhow!("relation \"users\" does not exist"),
        )));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");
    }
}
