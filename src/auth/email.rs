//! Email address checks used at registration.
//!
//! Two independent gates: [`parse_address`] accepts an RFC 5322 mailbox
//! (optionally with a display name), [`matches_pattern`] applies a stricter
//! ASCII pattern to the raw input. An address must pass both.

use email_address::EmailAddress;
use regex::Regex;
use std::{str::FromStr, sync::LazyLock};
use thiserror::Error;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").ok());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("{0}")]
    Malformed(String),
    #[error("does not match required pattern")]
    PatternMismatch,
}

/// Parsed mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

/// Structural mailbox parse: `local@domain` or `Display Name <local@domain>`.
///
/// # Errors
/// `Malformed` with the parser's reason.
pub fn parse_address(input: &str) -> Result<Mailbox, EmailError> {
    let parsed = EmailAddress::from_str(input.trim())
        .map_err(|err| EmailError::Malformed(err.to_string()))?;
    let name = parsed.display_part().trim().trim_matches('"').trim();
    Ok(Mailbox {
        name: (!name.is_empty()).then(|| name.to_string()),
        address: parsed.email(),
    })
}

/// Strict pattern check on the raw input.
#[must_use]
pub fn matches_pattern(input: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(input))
}

/// Both gates, in order.
///
/// # Errors
/// The structural error, or `PatternMismatch`.
pub fn validate(input: &str) -> Result<(), EmailError> {
    parse_address(input)?;
    if !matches_pattern(input) {
        return Err(EmailError::PatternMismatch);
    }
    Ok(())
}
