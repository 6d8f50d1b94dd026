use crate::{
    api::{self, ApiConfig},
    auth::{AuthConfig, CredentialService, LastLoginPolicy},
    cli::{commands::store::SessionBackend, telemetry},
    store::{
        IdentityStore, RoleStore, SessionStore,
        memory::MemorySessionStore,
        postgres::{self, PgIdentityStore, PgSessionStore},
    },
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub token_leeway_seconds: u64,
    pub last_login_policy: LastLoginPolicy,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
    pub cache_prefix: String,
    pub store_timeout_ms: u64,
    pub session_store: SessionBackend,
    pub session_sweep_seconds: u64,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &"***")
            .field("jwt_secret", &"***")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("token_leeway_seconds", &self.token_leeway_seconds)
            .field("last_login_policy", &self.last_login_policy)
            .field("cookie_secure", &self.cookie_secure)
            .field("cors_origin", &self.cors_origin)
            .field("cache_prefix", &self.cache_prefix)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("session_store", &self.session_store)
            .field("session_sweep_seconds", &self.session_sweep_seconds)
            .finish()
    }
}

impl Args {
    /// Credential service settings described by these arguments.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(
            self.jwt_secret.clone(),
            self.jwt_issuer.clone(),
            Duration::from_secs(self.access_token_ttl_seconds),
            Duration::from_secs(self.refresh_token_ttl_seconds),
        )
        .with_token_leeway_seconds(self.token_leeway_seconds)
        .with_key_prefix(self.cache_prefix.clone())
        .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
        .with_last_login_policy(self.last_login_policy)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let auth_config = args.auth_config();
    auth_config
        .validate()
        .map_err(|err| anyhow!(err))
        .context("Invalid credential settings")?;

    let pool = postgres::connect(&args.dsn).await?;
    let identities = Arc::new(PgIdentityStore::new(pool.clone()));

    let sweep_interval = Duration::from_secs(args.session_sweep_seconds);
    let sessions: Arc<dyn SessionStore> = match args.session_store {
        SessionBackend::Postgres => {
            let store = PgSessionStore::new(pool);
            let _sweeper = store.spawn_sweeper(sweep_interval);
            Arc::new(store)
        }
        SessionBackend::Memory => {
            let store = Arc::new(MemorySessionStore::new());
            let _sweeper = Arc::clone(&store).spawn_sweeper(sweep_interval);
            store
        }
    };
    info!(session_store = ?args.session_store, "Session store ready");

    let service = CredentialService::new(
        auth_config,
        Arc::clone(&identities) as Arc<dyn IdentityStore>,
        identities as Arc<dyn RoleStore>,
        sessions,
    )
    .context("Failed to build credential service")?;

    let api_config = ApiConfig {
        cookie_secure: args.cookie_secure,
        cors_origin: args.cors_origin,
    };

    let result = api::new(args.port, Arc::new(service), api_config).await;

    telemetry::shutdown_tracer();

    result
}
