//! API handlers for Custodia.
//!
//! Every protected handler starts with [`principal::require_auth`] and then
//! checks the role or permission it needs. Errors from the credential service
//! are rendered by [`error::error_response`].

pub mod auth;
pub mod error;
pub mod health;
pub mod principal;
pub mod roles;
pub mod users;
