//! Bearer authentication and authorization helpers for protected handlers.
//!
//! Flow Overview: read `Authorization: Bearer <access token>`, resolve it to a
//! [`Principal`] through the credential service, then check roles or
//! permissions in the handler.

use super::error::{INVALID_TOKEN, error_response, json_error};
use crate::auth::{AuthError, CredentialService, Principal};
use axum::{
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::Response,
};
use tracing::debug;

/// Resolve the bearer token into a principal, or render the rejection.
///
/// A token whose user no longer exists is answered like any other bad token.
pub async fn require_auth(
    headers: &HeaderMap,
    service: &CredentialService,
) -> Result<Principal, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(json_error(StatusCode::UNAUTHORIZED, "Missing bearer token"));
    };
    match service.authenticate(&token).await {
        Ok(principal) => Ok(principal),
        Err(AuthError::UserNotFound) => Err(json_error(StatusCode::UNAUTHORIZED, INVALID_TOKEN)),
        Err(err) => {
            debug!("Bearer authentication failed: {err}");
            Err(error_response(&err))
        }
    }
}

/// 403 unless the principal holds every listed permission.
pub fn require_permissions(principal: &Principal, required: &[&str]) -> Result<(), Response> {
    let missing = principal.missing_permissions(required);
    if missing.is_empty() {
        Ok(())
    } else {
        debug!(user_id = %principal.user_id(), ?missing, "Permission denied");
        Err(json_error(
            StatusCode::FORBIDDEN,
            format!("Missing permissions: {}", missing.join(", ")),
        ))
    }
}

/// 403 unless the principal holds at least one listed role.
pub fn require_role(principal: &Principal, roles: &[&str]) -> Result<(), Response> {
    if principal.has_any_role(roles) {
        Ok(())
    } else {
        debug!(user_id = %principal.user_id(), "Role check failed");
        Err(json_error(StatusCode::FORBIDDEN, "Insufficient role"))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
