//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, store};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let store_opts = store::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret: auth_opts.jwt_secret,
        jwt_issuer: auth_opts.jwt_issuer,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        token_leeway_seconds: auth_opts.token_leeway_seconds,
        last_login_policy: auth_opts.last_login_policy,
        cookie_secure: auth_opts.cookie_secure,
        cors_origin: auth_opts.cors_origin,
        cache_prefix: store_opts.cache_prefix,
        store_timeout_ms: store_opts.store_timeout_ms,
        session_store: store_opts.session_store,
        session_sweep_seconds: store_opts.session_sweep_seconds,
    }))
}
