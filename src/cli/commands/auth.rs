use crate::auth::{LastLoginPolicy, token::MAX_TOKEN_TTL};
use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_TOKEN_LEEWAY: &str = "token-leeway-seconds";
pub const ARG_LAST_LOGIN_POLICY: &str = "last-login-policy";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_CORS_ORIGIN: &str = "cors-origin";

const MAX_TTL_SECONDS: u64 = MAX_TOKEN_TTL.as_secs();

pub struct Options {
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub token_leeway_seconds: u64,
    pub last_login_policy: LastLoginPolicy,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing or a value does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;
        let last_login_policy = matches
            .get_one::<String>(ARG_LAST_LOGIN_POLICY)
            .map_or(Ok(LastLoginPolicy::default()), |value| {
                value.parse::<LastLoginPolicy>()
            })
            .map_err(|err| anyhow!(err))?;

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            jwt_issuer: matches
                .get_one::<String>(ARG_JWT_ISSUER)
                .cloned()
                .context("missing argument: --jwt-issuer")?,
            access_token_ttl_seconds: seconds(matches, ARG_ACCESS_TTL)?,
            refresh_token_ttl_seconds: seconds(matches, ARG_REFRESH_TTL)?,
            token_leeway_seconds: seconds(matches, ARG_TOKEN_LEEWAY)?,
            last_login_policy,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            cors_origin: matches.get_one::<String>(ARG_CORS_ORIGIN).cloned(),
        })
    }
}

// Every seconds argument carries a clap default, so absence is a wiring bug.
fn seconds(matches: &ArgMatches, name: &str) -> Result<u64> {
    matches
        .get_one::<u64>(name)
        .copied()
        .with_context(|| format!("missing argument: --{name}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_session_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access and refresh tokens (at least 32 bytes)")
                .env("CUSTODIA_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Issuer claim written into and required of every token")
                .env("CUSTODIA_JWT_ISSUER")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("CUSTODIA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token TTL in seconds")
                .env("CUSTODIA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_TOKEN_LEEWAY)
                .long(ARG_TOKEN_LEEWAY)
                .help("Clock skew tolerated when checking token expiry, in seconds")
                .env("CUSTODIA_TOKEN_LEEWAY_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LAST_LOGIN_POLICY)
                .long(ARG_LAST_LOGIN_POLICY)
                .help("Whether a failed last-login update fails the login")
                .env("CUSTODIA_LAST_LOGIN_POLICY")
                .default_value("best-effort")
                .value_parser(["best-effort", "required"]),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark the refresh token cookie Secure (HTTPS only)")
                .env("CUSTODIA_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_CORS_ORIGIN)
                .long(ARG_CORS_ORIGIN)
                .help("Browser origin allowed to call the API with credentials")
                .env("CUSTODIA_CORS_ORIGIN"),
        )
}
