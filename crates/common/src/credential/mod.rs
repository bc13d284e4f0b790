//! Ambient credential sources for resource-scoped access tokens.
//!
//! A [`CredentialSource`] turns the identity the process is running under
//! into a short-lived bearer token for one resource scope (for example
//! `https://database.windows.net/.default`). The concrete sources mirror the
//! usual resolution order of a cloud workload:
//!
//! - [`ClientSecretCredential`] - service principal from environment variables
//! - [`ManagedIdentityCredential`] - App Service / Container Apps identity
//!   endpoint, falling back to the instance metadata service
//! - [`AzureCliCredential`] - developer login cached by the `az` CLI
//! - [`DefaultCredentialChain`] - tries the above in order
//!
//! # Security
//!
//! - Tokens and client secrets are held as `SecretString` (never logged)
//! - Acquisition events are logged without token values
//! - Error messages carry status codes and source names, never response bodies
//! - HTTP timeouts prevent hanging connections
//!
//! None of the sources retry. A failed acquisition is returned to the caller
//! immediately.

mod azure_cli;
mod chain;
mod client_secret;
mod managed_identity;

pub use azure_cli::AzureCliCredential;
pub use chain::DefaultCredentialChain;
pub use client_secret::{ClientSecretCredential, DEFAULT_AUTHORITY_HOST};
pub use managed_identity::{ManagedIdentityCredential, IMDS_ENDPOINT};

use crate::secret::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default HTTP request timeout for token endpoints.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for token endpoints.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Suffix that turns a resource URI into a v2 scope.
const DEFAULT_SCOPE_SUFFIX: &str = "/.default";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring an access token.
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    /// The source lacks the configuration it needs (e.g. missing env vars).
    #[error("Credential not configured: {0}")]
    NotConfigured(String),

    /// HTTP client error or unexpected status from the token endpoint.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Authentication rejected by the identity provider (400, 401, 403).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// A credential helper process failed or timed out.
    #[error("Credential process failed: {0}")]
    ProcessFailed(String),

    /// Every source in a chain failed.
    #[error("No credential source produced a token: {}", .0.join("; "))]
    Unavailable(Vec<String>),
}

// =============================================================================
// Access Token
// =============================================================================

/// A resource-scoped bearer token and the instant it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Create a new access token.
    #[must_use]
    pub fn new(token: SecretString, expires_on: DateTime<Utc>) -> Self {
        Self { token, expires_on }
    }

    /// The opaque token value.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Expiry instant reported by the identity provider.
    #[must_use]
    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// True if the token expires within `margin` of `now` (or already has).
    #[must_use]
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(margin) {
            Some(deadline) => self.expires_on <= deadline,
            None => true,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

// =============================================================================
// Credential Source
// =============================================================================

/// Something that can mint a bearer token for a resource scope.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short, stable name used in logs and aggregated chain errors.
    fn name(&self) -> &'static str;

    /// Acquire a token for `scope`.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if the token cannot be obtained. Callers must
    /// not retry inside the core; resilience is layered outside.
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

/// Convert a v2 scope (`https://database.windows.net/.default`) into the
/// v1 resource identifier expected by managed identity endpoints.
#[must_use]
pub fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix(DEFAULT_SCOPE_SUFFIX).unwrap_or(scope)
}

/// Build the HTTP client shared by the HTTP-based sources.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, CredentialError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| CredentialError::NotConfigured(format!("Failed to build HTTP client: {e}")))
}

/// Convert a relative lifetime into an absolute expiry instant.
fn expires_in_to_instant(expires_in: u64) -> DateTime<Utc> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Map a non-success token endpoint response to a `CredentialError`.
///
/// The body is logged at trace level only; it never enters the error message.
async fn error_for_status(response: reqwest::Response, source: &'static str) -> CredentialError {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|e| {
        trace!(target: "common.credential", error = %e, "Failed to read error response body");
        "<failed to read body>".to_string()
    });
    trace!(
        target: "common.credential",
        source,
        body = %body,
        "Token endpoint error response body"
    );

    if matches!(status.as_u16(), 400 | 401 | 403) {
        warn!(target: "common.credential", source, status = %status, "Authentication rejected");
        CredentialError::AuthenticationRejected(format!("Status {status}"))
    } else if status.is_server_error() {
        warn!(target: "common.credential", source, status = %status, "Token endpoint server error");
        CredentialError::HttpError(format!("Server error: {status}"))
    } else {
        warn!(target: "common.credential", source, status = %status, "Unexpected token endpoint response");
        CredentialError::HttpError(format!("Unexpected status: {status}"))
    }
}

/// Interpret an absolute epoch-seconds expiry.
fn epoch_to_instant(epoch_seconds: i64) -> Result<DateTime<Utc>, CredentialError> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0).ok_or_else(|| {
        CredentialError::InvalidResponse(format!("expiry {epoch_seconds} is out of range"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_to_resource_strips_default_suffix() {
        assert_eq!(
            scope_to_resource("https://database.windows.net/.default"),
            "https://database.windows.net"
        );
        assert_eq!(
            scope_to_resource("https://database.windows.net/"),
            "https://database.windows.net/"
        );
    }

    #[test]
    fn test_access_token_debug_redacts() {
        let token = AccessToken::new(SecretString::from("super-secret-token"), Utc::now());
        let debug_str = format!("{token:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-token"));
        assert!(debug_str.contains("expires_on"));
    }

    #[test]
    fn test_expires_within() {
        let now = Utc::now();
        let token = AccessToken::new(
            SecretString::from("t"),
            now + chrono::Duration::seconds(600),
        );

        assert!(!token.expires_within(Duration::from_secs(300), now));
        assert!(token.expires_within(Duration::from_secs(600), now));
        assert!(token.expires_within(Duration::from_secs(601), now));
    }

    #[test]
    fn test_already_expired_token_expires_within_zero() {
        let now = Utc::now();
        let token = AccessToken::new(SecretString::from("t"), now - chrono::Duration::seconds(1));
        assert!(token.expires_within(Duration::ZERO, now));
    }

    #[test]
    fn test_epoch_to_instant() {
        let instant = epoch_to_instant(1_700_000_000).unwrap();
        assert_eq!(instant.timestamp(), 1_700_000_000);
        assert!(epoch_to_instant(i64::MAX).is_err());
    }

    #[test]
    fn test_expires_in_to_instant_saturates() {
        let instant = expires_in_to_instant(u64::MAX);
        assert_eq!(instant, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError::AuthenticationRejected("Status 401".to_string());
        assert!(err.to_string().contains("Status 401"));

        let err = CredentialError::Unavailable(vec![
            "environment: not configured".to_string(),
            "azure_cli: exit status 1".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("environment: not configured"));
        assert!(msg.contains("azure_cli: exit status 1"));
    }
}
