//! JWT utilities shared across Data API components.
//!
//! This module provides the pre-verification helpers used by the token
//! validator:
//! - Size limits for DoS prevention
//! - Clock skew constants for temporal claim validation
//! - Header inspection (`kid`, `alg`) without signature verification
//! - An unverified expiry peek used only to reject tokens early
//! - iat validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing in this module establishes trust. Every helper here operates
//!   on unverified input and may only be used to select a key or to reject
//!   a token, never to accept one.
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_header, peek_expiry, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! // Inspect the header to find the signing key
//! let header = extract_header(token)?;
//! let key = key_set.get(&header.kid);
//!
//! // After signature verification, validate iat
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - Typical RS256 access tokens are 800-1500 bytes (2048-bit signature plus claims)
/// - 8KB leaves room for large group/role claims while bounding base64 and
///   RSA verification work per request
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this value is rejected at startup.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT pre-validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token is missing the `alg` header.
    #[error("The access token is invalid or expired")]
    MissingAlgorithm,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

impl JwtValidationError {
    /// Short, stable description of the failure for server-side logs.
    #[must_use]
    pub fn cause(&self) -> &'static str {
        match self {
            Self::TokenTooLarge => "token exceeds maximum size",
            Self::MalformedToken => "token is not a well-formed compact JWS",
            Self::MissingKid => "token header has no usable kid",
            Self::MissingAlgorithm => "token header has no alg",
            Self::IatTooFarInFuture => "token iat is too far in the future",
        }
    }
}

// =============================================================================
// Header Types
// =============================================================================

/// The parts of an unverified JWT header needed to select a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtHeaderInfo {
    /// Key identifier used to look up the signing key.
    pub kid: String,

    /// Declared signature algorithm (e.g. `RS256`). Untrusted until checked
    /// against the configured allow-list and the key's own algorithm.
    pub alg: String,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a token into its three segments after the size check.
fn split_segments(token: &str) -> Result<[&str; 3], JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok([header, payload, signature])
        }
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

/// Decode one base64url segment into a JSON object.
fn decode_segment(segment: &str) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(JwtValidationError::MalformedToken)
    }
}

/// Extract `kid` and `alg` from a JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - This function does NOT validate the token signature
/// - The returned values must only be used for key lookup and algorithm
///   allow-list checks
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Wrong structure, bad base64, or header is not a JSON object
/// - `MissingKid` - Header missing `kid`, or `kid` is empty or not a string
/// - `MissingAlgorithm` - Header missing `alg`, or `alg` is not a string
pub fn extract_header(token: &str) -> Result<JwtHeaderInfo, JwtValidationError> {
    let [header_part, _, _] = split_segments(token)?;
    let header = decode_segment(header_part)?;

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingAlgorithm)?;

    // Empty kid values are rejected along with missing ones
    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(JwtHeaderInfo { kid, alg })
}

/// Extract only the `kid` from a JWT header.
///
/// # Errors
///
/// Same as [`extract_header`].
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    extract_header(token).map(|header| header.kid)
}

/// Read the `exp` claim from the unverified payload.
///
/// Returns `Ok(None)` when the payload has no numeric `exp`. The result must
/// only be used to REJECT a token early; it never makes a token acceptable.
///
/// # Errors
///
/// Returns `MalformedToken` if the payload segment cannot be decoded.
pub fn peek_expiry(token: &str) -> Result<Option<i64>, JwtValidationError> {
    let [_, payload_part, _] = split_segments(token)?;
    let payload = decode_segment(payload_part)?;

    #[allow(clippy::cast_possible_truncation)]
    let exp = payload.get("exp").and_then(|v| {
        // Fractional NumericDate values are truncated
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
    });

    Ok(exp)
}

/// Returns true if `exp` is strictly in the past once `leeway` is applied.
#[must_use]
pub fn is_expired_at(exp: i64, leeway: Duration, now: i64) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let leeway_secs = leeway.as_secs() as i64;
    exp.saturating_add(leeway_secs) < now
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// Rejects tokens with `iat` too far in the future.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// Prefer [`validate_iat`] in production code. This variant exists so that
/// boundary conditions can be unit-tested without wall-clock dependence.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds), well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
