//! Self-service profile endpoints and user administration.
//!
//! Flow Overview:
//! 1) Authenticate the bearer access token.
//! 2) Check role or permission for administrative routes.
//! 3) Delegate to the credential service.

use super::{
    auth::{RefreshRequest, clear_refresh_cookie, presented_refresh_token},
    error::{error_response, json_error},
    principal::{require_auth, require_permissions, require_role},
};
use crate::{
    api::ApiConfig,
    auth::CredentialService,
    model::PublicUser,
    store::ProfileUpdate,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_NAME_LEN: usize = 100;
const MAX_AVATAR_URL_LEN: usize = 2048;

pub const ADMIN_ROLE: &str = "admin";
pub const USER_READ: &str = "user:read";
pub const ROLE_ASSIGN: &str = "role:assign";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user: PublicUser,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    /// Empty string clears the avatar.
    pub avatar_url: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserList {
    pub users: Vec<PublicUser>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    fn bounds(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[utoipa::path(
    get,
    path = "/v1/users/me",
    responses(
        (status = 200, description = "Authenticated user with roles and effective permissions", body = MeResponse),
        (status = 401, description = "Missing or invalid access token", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_me(headers: HeaderMap, service: Extension<Arc<CredentialService>>) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let permissions = principal.effective_permissions().to_vec();
    let response = MeResponse {
        roles: principal.roles.iter().map(|role| role.name.clone()).collect(),
        user: principal.user,
        permissions,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    put,
    path = "/v1/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = PublicUser),
        (status = 400, description = "Invalid update payload", body = super::error::ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_me(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Json(request): Json<UpdateProfileRequest>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let update = match profile_update(request) {
        Ok(update) => update,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };

    match service.update_profile(principal.user_id(), update).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/me",
    request_body(content = RefreshRequest, description = "Optional refresh token to revoke with the account"),
    responses(
        (status = 204, description = "Account deleted and refresh cookie cleared"),
        (status = 401, description = "Missing or invalid access token", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn delete_me(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    config: Extension<ApiConfig>,
    body: Bytes,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let refresh_token = presented_refresh_token(&headers, &body);
    if let Err(err) = service
        .delete_account(principal.user_id(), refresh_token.as_deref())
        .await
    {
        return error_response(&err);
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(&config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    get,
    path = "/v1/users",
    params(Pagination),
    responses(
        (status = 200, description = "Page of live users", body = UserList),
        (status = 401, description = "Missing or invalid access token", body = super::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Query(pagination): Query<Pagination>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_role(&principal, &[ADMIN_ROLE]) {
        return response;
    }

    let (limit, offset) = pagination.bounds();
    match service.list_users(limit, offset).await {
        Ok((users, total)) => (
            StatusCode::OK,
            Json(UserList {
                users,
                total,
                limit,
                offset,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User found", body = PublicUser),
        (status = 403, description = "Missing user:read", body = super::error::ErrorBody),
        (status = 404, description = "No such user", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Path(id): Path<Uuid>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[USER_READ]) {
        return response;
    }

    match service.find_user(id).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/users/email/{email}",
    params(("email" = String, Path, description = "Registered email address")),
    responses(
        (status = 200, description = "User found", body = PublicUser),
        (status = 403, description = "Missing user:read", body = super::error::ErrorBody),
        (status = 404, description = "No live user with that email", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user_by_email(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Path(email): Path<String>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[USER_READ]) {
        return response;
    }

    match service.find_user_by_email(&email).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    put,
    path = "/v1/users/{id}/roles/{role_id}",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("role_id" = Uuid, Path, description = "Role id"),
    ),
    responses(
        (status = 204, description = "Role assigned (idempotent)"),
        (status = 403, description = "Missing role:assign", body = super::error::ErrorBody),
        (status = 404, description = "No such user or role", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
pub async fn assign_role(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[ROLE_ASSIGN]) {
        return response;
    }

    match service.assign_role(id, role_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/{id}/roles/{role_id}",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("role_id" = Uuid, Path, description = "Role id"),
    ),
    responses(
        (status = 204, description = "Role removed (idempotent)"),
        (status = 403, description = "Missing role:assign", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
pub async fn remove_role(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[ROLE_ASSIGN]) {
        return response;
    }

    match service.remove_role(id, role_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

fn profile_update(request: UpdateProfileRequest) -> Result<ProfileUpdate, String> {
    let name = request.name.map(|name| name.trim().to_string());
    if let Some(name) = &name {
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(format!("name must be 1 to {MAX_NAME_LEN} characters"));
        }
    }

    let avatar_url = request.avatar_url.map(|url| url.trim().to_string());
    if let Some(url) = &avatar_url {
        if url.len() > MAX_AVATAR_URL_LEN {
            return Err("avatar_url is too long".to_string());
        }
        if !url.is_empty() && url::Url::parse(url).is_err() {
            return Err("avatar_url must be an absolute URL".to_string());
        }
    }

    if name.is_none() && avatar_url.is_none() {
        return Err("No updates provided.".to_string());
    }
    Ok(ProfileUpdate { name, avatar_url })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(Pagination::default().bounds(), (20, 0));
        let wide = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(wide.bounds(), (100, 0));
        let zero = Pagination {
            limit: Some(0),
            offset: Some(40),
        };
        assert_eq!(zero.bounds(), (1, 40));
    }

    #[test]
    fn profile_update_requires_a_field() {
        let empty = UpdateProfileRequest {
            name: None,
            avatar_url: None,
        };
        assert!(profile_update(empty).is_err());
    }

    #[test]
    fn profile_update_validates_fields() {
        let blank_name = UpdateProfileRequest {
            name: Some("   ".to_string()),
            avatar_url: None,
        };
        assert!(profile_update(blank_name).is_err());

        let bad_url = UpdateProfileRequest {
            name: None,
            avatar_url: Some("not a url".to_string()),
        };
        assert!(profile_update(bad_url).is_err());

        let clear_avatar = UpdateProfileRequest {
            name: Some(" Ada ".to_string()),
            avatar_url: Some(String::new()),
        };
        let update = profile_update(clear_avatar).unwrap_or_default();
        assert_eq!(update.name.as_deref(), Some("Ada"));
        assert_eq!(update.avatar_url.as_deref(), Some(""));
    }
}
