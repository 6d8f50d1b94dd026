//! Register, login, refresh and logout endpoints.
//!
//! Token pairs are returned in the JSON body. The refresh token is also set
//! as an `HttpOnly` cookie so browser clients can refresh without touching it;
//! refresh and logout accept it from either place, body first.

use super::error::{INVALID_TOKEN, error_response, json_error};
use crate::{
    api::ApiConfig,
    auth::{AuthError, AuthSession, CredentialService},
};
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::error;
use utoipa::ToSchema;

pub const REFRESH_COOKIE_NAME: &str = "custodia_refresh";
const MAX_NAME_LEN: usize = 100;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, session opened", body = AuthSession),
        (status = 400, description = "Invalid email, weak password or missing name", body = super::error::ErrorBody),
        (status = 409, description = "Email already registered", body = super::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn register(
    service: Extension<Arc<CredentialService>>,
    config: Extension<ApiConfig>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return json_error(
            StatusCode::BAD_REQUEST,
            format!("name must be 1 to {MAX_NAME_LEN} characters"),
        );
    }

    match service
        .register(request.email.trim(), &request.password, name)
        .await
    {
        Ok(session) => session_response(StatusCode::CREATED, &service, &config, session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = AuthSession),
        (status = 401, description = "Invalid email or password", body = super::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    service: Extension<Arc<CredentialService>>,
    config: Extension<ApiConfig>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match service.login(request.email.trim(), &request.password).await {
        Ok(session) => session_response(StatusCode::OK, &service, &config, session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 200, description = "New token pair; the presented refresh token is retired", body = AuthSession),
        (status = 401, description = "Refresh token invalid, expired or already used", body = super::error::ErrorBody),
        (status = 403, description = "Account is disabled", body = super::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    config: Extension<ApiConfig>,
    body: Bytes,
) -> Response {
    let Some(token) = presented_refresh_token(&headers, &body) else {
        return json_error(StatusCode::UNAUTHORIZED, "Missing refresh token");
    };

    match service.refresh(&token).await {
        Ok(session) => session_response(StatusCode::OK, &service, &config, session),
        Err(AuthError::UserNotFound) => json_error(StatusCode::UNAUTHORIZED, INVALID_TOKEN),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 204, description = "Refresh token retired and cookie cleared"),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    service: Extension<Arc<CredentialService>>,
    config: Extension<ApiConfig>,
    body: Bytes,
) -> Response {
    if let Some(token) = presented_refresh_token(&headers, &body) {
        if let Err(err) = service.logout(&token).await {
            return error_response(&err);
        }
    }

    // Always clear the cookie, even if no token was presented.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(&config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

fn session_response(
    status: StatusCode,
    service: &CredentialService,
    config: &ApiConfig,
    session: AuthSession,
) -> Response {
    let mut headers = HeaderMap::new();
    match refresh_cookie(
        config,
        &session.tokens.refresh_token,
        service.config().refresh_token_ttl(),
    ) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build refresh cookie: {err}"),
    }
    (status, headers, Json(session)).into_response()
}

/// Refresh token from the JSON body, falling back to the cookie.
pub(crate) fn presented_refresh_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if !body.is_empty() {
        if let Ok(RefreshRequest {
            refresh_token: Some(token),
        }) = serde_json::from_slice::<RefreshRequest>(body)
        {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    extract_refresh_cookie(headers)
}

/// `HttpOnly` cookie carrying the refresh token.
pub(crate) fn refresh_cookie(
    config: &ApiConfig,
    token: &str,
    ttl: Duration,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_refresh_cookie(config: &ApiConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{REFRESH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == REFRESH_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}
