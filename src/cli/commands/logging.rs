use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

// Index is the verbosity count the name stands for.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// How log lines are rendered on stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human oriented.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// `None` keeps the default (errors only).
    pub level: Option<Level>,
    pub format: LogFormat,
}

impl Options {
    /// # Errors
    /// Returns an error if the log format does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
        let format = matches
            .get_one::<String>(ARG_LOG_FORMAT)
            .map_or(Ok(LogFormat::default()), |value| value.parse())
            .map_err(|err: String| anyhow!(err))?;
        Ok(Self {
            level: level_for(verbosity),
            format,
        })
    }
}

const fn level_for(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// Accepts a level name or its verbosity count (`CUSTODIA_LOG_LEVEL=debug` or `=3`).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> Result<u8, String> {
        let name = level.to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .and_then(|index| u8::try_from(index).ok())
            .or_else(|| level.parse::<u8>().ok().filter(|count| *count <= 5))
            .ok_or_else(|| format!("invalid log level: {level}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CUSTODIA_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("CUSTODIA_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(["pretty", "json"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("custodia"))
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), None);
        assert_eq!(level_for(1), Some(Level::WARN));
        assert_eq!(level_for(2), Some(Level::INFO));
        assert_eq!(level_for(3), Some(Level::DEBUG));
        assert_eq!(level_for(9), Some(Level::TRACE));
    }

    #[test]
    fn options_from_flags() -> Result<()> {
        temp_env::with_vars_unset(["CUSTODIA_LOG_LEVEL", "CUSTODIA_LOG_FORMAT"], || {
            let matches = command().get_matches_from(["custodia", "-vv", "--log-format", "json"]);
            let options = Options::parse(&matches)?;
            assert_eq!(options.level, Some(Level::INFO));
            assert_eq!(options.format, LogFormat::Json);

            let defaults = Options::parse(&command().get_matches_from(["custodia"]))?;
            assert_eq!(defaults.level, None);
            assert_eq!(defaults.format, LogFormat::Pretty);
            Ok(())
        })
    }

    #[test]
    fn level_accepts_names_and_counts() {
        temp_env::with_vars([("CUSTODIA_LOG_LEVEL", Some("DEBUG"))], || {
            let matches = command().get_matches_from(["custodia"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
        temp_env::with_vars([("CUSTODIA_LOG_LEVEL", Some("4"))], || {
            let matches = command().get_matches_from(["custodia"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(4));
        });
        temp_env::with_vars([("CUSTODIA_LOG_LEVEL", Some("loud"))], || {
            assert!(command().try_get_matches_from(["custodia"]).is_err());
        });
    }

    #[test]
    fn unknown_format_is_rejected() {
        temp_env::with_vars_unset(["CUSTODIA_LOG_FORMAT"], || {
            let result = command().try_get_matches_from(["custodia", "--log-format", "xml"]);
            assert!(result.is_err());
        });
    }
}
