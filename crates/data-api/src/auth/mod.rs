//! Bearer token authentication.
//!
//! - `jwks` - fetches and memoizes the identity provider's signing keys
//! - `jwt` - validates bearer tokens against those keys
//! - `principal` - the authenticated caller handed to handlers

pub mod jwks;
pub mod jwt;
pub mod principal;

pub use jwks::{KeySetCache, SigningKey, SigningKeySet};
pub use jwt::{TokenValidator, ValidatorSettings};
pub use principal::Principal;

use thiserror::Error;

/// Why a bearer token was not accepted.
///
/// Every variant carries an internal cause for logs. Causes never contain
/// the raw token or key material.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Required authentication settings are missing or unusable.
    #[error("Authentication is not configured: {0}")]
    Config(String),

    /// The key set could not be retrieved or parsed.
    #[error("Signing keys unavailable: {0}")]
    Fetch(String),

    /// No key in the key set matches the token's `kid`.
    #[error("No signing key matches the token key id")]
    UnknownKey { kid: String },

    /// The token's `exp` is in the past.
    #[error("The access token has expired")]
    Expired,

    /// Signature, claims or structure are invalid.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Bounded label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "config_error",
            AuthError::Fetch(_) => "fetch_error",
            AuthError::UnknownKey { .. } => "unknown_key",
            AuthError::Expired => "expired",
            AuthError::InvalidToken(_) => "invalid",
        }
    }
}
