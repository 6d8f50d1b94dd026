//! Signed, time-bounded access and refresh tokens (HS256 JWT).
//!
//! Both kinds share the signing secret and issuer. They differ in lifetime,
//! in the presence of the `email` claim, and in the `typ` claim, which keeps a
//! refresh token from being accepted where an access token is expected.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind as JwtErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;
use uuid::Uuid;

/// Shortest accepted HMAC secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted token lifetime (365 days).
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("unexpected signing algorithm")]
    UnexpectedAlgorithm,
    #[error("token issuer mismatch")]
    IssuerMismatch,
    #[error("expected {expected} token, got {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("signing secret must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),
    #[error("token TTL must be between 1 second and 365 days, got {0:?}")]
    TtlOutOfRange(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub typ: TokenKind,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway_seconds: u64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// # Errors
    /// `SecretTooShort` when the secret has fewer than [`MIN_SECRET_LEN`] bytes,
    /// `TtlOutOfRange` when either lifetime is zero or above [`MAX_TOKEN_TTL`].
    pub fn new(
        secret: &SecretString,
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort(bytes.len()));
        }
        for ttl in [access_ttl, refresh_ttl] {
            if ttl < Duration::from_secs(1) || ttl > MAX_TOKEN_TTL {
                return Err(TokenError::TtlOutOfRange(ttl));
            }
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
            leeway_seconds: 0,
        })
    }

    /// Clock skew tolerated when checking `exp`.
    #[must_use]
    pub const fn with_leeway_seconds(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// # Errors
    /// `Signing` if the token cannot be encoded.
    pub fn issue_access_token(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        self.sign(user_id, Some(email.to_string()), TokenKind::Access, self.access_ttl)
    }

    /// # Errors
    /// `Signing` if the token cannot be encoded.
    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.sign(user_id, None, TokenKind::Refresh, self.refresh_ttl)
    }

    fn sign(
        &self,
        user_id: Uuid,
        email: Option<String>,
        typ: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id,
            email,
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4(),
            typ,
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// Verify signature, issuer and expiry and return the claims.
    ///
    /// The header algorithm is checked before anything else is decoded.
    ///
    /// # Errors
    /// Any [`TokenError`] validation variant.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnexpectedAlgorithm);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = self.leeway_seconds;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                JwtErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                JwtErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
                JwtErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm,
                _ => TokenError::Malformed,
            })
    }

    /// [`Self::validate`] plus a check of the `typ` claim.
    ///
    /// # Errors
    /// `WrongKind` when the token is valid but of the other kind.
    pub fn validate_kind(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.validate(token)?;
        if claims.typ != expected {
            return Err(TokenError::WrongKind {
                expected,
                found: claims.typ,
            });
        }
        Ok(claims)
    }
}
