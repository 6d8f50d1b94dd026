use anyhow::{Result, anyhow};
use clap::{Arg, ArgMatches, Command};

pub const ARG_CACHE_PREFIX: &str = "cache-prefix";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_SESSION_STORE: &str = "session-store";
pub const ARG_SESSION_SWEEP_SECONDS: &str = "session-sweep-seconds";

/// Where refresh sessions are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionBackend {
    #[default]
    Postgres,
    /// Process memory; sessions are lost on restart and not shared between replicas.
    Memory,
}

impl std::str::FromStr for SessionBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown session store: {other}")),
        }
    }
}

pub struct Options {
    pub cache_prefix: String,
    pub store_timeout_ms: u64,
    pub session_store: SessionBackend,
    pub session_sweep_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the session store name is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let session_store = matches
            .get_one::<String>(ARG_SESSION_STORE)
            .map_or(Ok(SessionBackend::default()), |value| {
                value.parse::<SessionBackend>()
            })
            .map_err(|err| anyhow!(err))?;

        Ok(Self {
            cache_prefix: matches
                .get_one::<String>(ARG_CACHE_PREFIX)
                .cloned()
                .unwrap_or_else(|| "custodia".to_string()),
            store_timeout_ms: matches
                .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                .copied()
                .unwrap_or(3000),
            session_store,
            session_sweep_seconds: matches
                .get_one::<u64>(ARG_SESSION_SWEEP_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CACHE_PREFIX)
                .long(ARG_CACHE_PREFIX)
                .help("Prefix for session store keys, e.g. <prefix>:refresh_token:<token>")
                .env("CUSTODIA_CACHE_PREFIX")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Deadline for each store call in milliseconds")
                .env("CUSTODIA_STORE_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_STORE)
                .long(ARG_SESSION_STORE)
                .help("Session store backend")
                .env("CUSTODIA_SESSION_STORE")
                .default_value("postgres")
                .value_parser(["postgres", "memory"]),
        )
        .arg(
            Arg::new(ARG_SESSION_SWEEP_SECONDS)
                .long(ARG_SESSION_SWEEP_SECONDS)
                .help("Interval between purges of expired session entries, in seconds")
                .env("CUSTODIA_SESSION_SWEEP_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
