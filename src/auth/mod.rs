//! Credential primitives and the lifecycle service built on them.

pub mod config;
pub mod email;
pub mod error;
pub mod password;
pub mod permissions;
pub mod service;
pub mod token;

pub use config::{AuthConfig, LastLoginPolicy, MIN_PASSWORD_LEN};
pub use error::{AuthError, CredentialFailure, ErrorKind};
pub use password::{HashCost, PasswordError, PasswordHasher};
pub use permissions::EffectivePermissions;
pub use service::{AuthSession, AuthTokens, CredentialService, Principal};
pub use token::{Claims, TokenError, TokenIssuer, TokenKind};
