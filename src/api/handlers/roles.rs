//! Role administration.

use super::{
    error::{error_response, json_error},
    principal::{require_auth, require_permissions},
};
use crate::{
    auth::CredentialService,
    model::{NewRole, Permission, Role},
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

pub const ROLE_READ: &str = "role:read";
pub const ROLE_WRITE: &str = "role:write";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[schema(example = json!(["workflow:read", "workflow:write"]))]
    pub permissions: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/v1/roles",
    responses(
        (status = 200, description = "All roles, ordered by name", body = [Role]),
        (status = 403, description = "Missing role:read", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
pub async fn list_roles(headers: HeaderMap, service: Extension<Arc<CredentialService>>) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[ROLE_READ]) {
        return response;
    }

    match service.list_roles().await {
        Ok(roles) => (StatusCode::OK, Json(roles)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Invalid name or permission string", body = super::error::ErrorBody),
        (status = 403, description = "Missing role:write", body = super::error::ErrorBody),
        (status = 409, description = "Role name already exists", body = super::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
pub async fn create_role(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    Json(request): Json<CreateRoleRequest>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = require_permissions(&principal, &[ROLE_WRITE]) {
        return response;
    }

    let permissions = match request
        .permissions
        .iter()
        .map(|value| Permission::parse(value))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(permissions) => permissions,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let role = NewRole {
        name: request.name,
        description: request
            .description
            .map(|description| description.trim().to_string())
            .filter(|description| !description.is_empty()),
        permissions,
    };
    match service.create_role(role).await {
        Ok(role) => (StatusCode::CREATED, Json(role)).into_response(),
        Err(err) => error_response(&err),
    }
}
