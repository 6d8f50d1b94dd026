use crate::{GIT_COMMIT_HASH, auth::CredentialService};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    identity_store: String,
    session_store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Identity and session stores are reachable", body = [Health]),
        (status = 503, description = "A store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, service: Extension<Arc<CredentialService>>) -> impl IntoResponse {
    let (identity, session) = service.ping().await;

    if let Err(err) = &identity {
        error!("Identity store health check failed: {err:?}");
    }
    if let Err(err) = &session {
        error!("Session store health check failed: {err:?}");
    }
    let is_healthy = identity.is_ok() && session.is_ok();

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity_store: status_label(identity.is_ok()),
        session_store: status_label(session.is_ok()),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Empty headers if the value could not be built
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Pong {
    message: String,
}

#[utoipa::path(
    get,
    path = "/v1/ping",
    responses((status = 200, description = "Process is serving requests", body = Pong)),
    tag = "health"
)]
// Liveness only; stores are not touched.
pub async fn ping() -> Json<Pong> {
    Json(Pong {
        message: "pong".to_string(),
    })
}

fn status_label(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}
