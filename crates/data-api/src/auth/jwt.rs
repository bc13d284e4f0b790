//! Bearer token validation.
//!
//! Validates inbound JWTs using public keys from the identity provider's
//! JWKS endpoint and produces the caller's [`Principal`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - `alg` must be on the configured allow-list and match the key; `none`
//!   is never accepted
//! - An `exp` in the past rejects the token before the signature is checked
//! - `iss` and `aud` are required and must match configuration (fail closed)
//! - Error causes never contain the token or key material

use crate::auth::jwks::{KeySetCache, SigningKey};
use crate::auth::principal::Principal;
use crate::auth::AuthError;
use crate::config::Config;
use crate::observability::metrics::record_token_validation;
use common::jwt::{extract_header, is_expired_at, peek_expiry, validate_iat};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Claims the service reads after the signature is verified.
///
/// `exp`, `nbf`, `iss` and `aud` are checked by `jsonwebtoken` itself.
#[derive(Deserialize)]
struct VerifiedClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
}

/// Validation policy.
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Expected `iss` claim. Required.
    pub issuer: Option<String>,

    /// Expected `aud` claim. Required.
    pub audience: Option<String>,

    /// Accepted header algorithms.
    pub allowed_algorithms: Vec<Algorithm>,

    /// Clock leeway for `exp`, `nbf` and `iat`.
    pub leeway: Duration,

    /// Reject tokens without an `email` claim.
    pub require_email: bool,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            allowed_algorithms: vec![Algorithm::RS256],
            leeway: Duration::ZERO,
            require_email: false,
        }
    }
}

impl ValidatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            allowed_algorithms: config.allowed_algorithms.clone(),
            leeway: Duration::from_secs(config.jwt_leeway_seconds),
            require_email: config.require_email,
        }
    }
}

/// Validates bearer tokens against the key-set cache.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    key_set: Arc<KeySetCache>,
    settings: ValidatorSettings,
}

impl TokenValidator {
    pub fn new(key_set: Arc<KeySetCache>, settings: ValidatorSettings) -> Self {
        Self { key_set, settings }
    }

    /// The key-set cache this validator reads from.
    pub fn key_set(&self) -> &Arc<KeySetCache> {
        &self.key_set
    }

    /// Validate a bearer token and return the authenticated principal.
    ///
    /// # Security Checks
    ///
    /// 1. Size check, then `kid` and `alg` from the unverified header
    /// 2. `alg` must be allowed; key looked up by `kid`
    /// 3. `alg` must match the key's algorithm
    /// 4. `exp` in the past rejects immediately, whatever the signature
    /// 5. Signature, `exp`, `nbf`, `iss`, `aud` verified
    /// 6. `iat` must not be in the future beyond the leeway
    /// 7. `email` extracted (required only in strict mode)
    ///
    /// # Errors
    ///
    /// - `AuthError::Config` - issuer, audience or JWKS URL not configured
    /// - `AuthError::Fetch` - key set could not be retrieved
    /// - `AuthError::UnknownKey` - no key matches the token's `kid`
    /// - `AuthError::Expired` - `exp` is in the past
    /// - `AuthError::InvalidToken` - anything else
    #[instrument(skip_all)]
    pub async fn validate_bearer(&self, token: &str) -> Result<Principal, AuthError> {
        let start = Instant::now();
        let result = self.validate_inner(token).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        record_token_validation(outcome, start.elapsed());

        if let Err(e) = &result {
            tracing::debug!(target: "api.auth.jwt", outcome, error = %e, "Token rejected");
        }
        result
    }

    async fn validate_inner(&self, token: &str) -> Result<Principal, AuthError> {
        let (issuer, audience) = self.required_claims()?;

        // 1. Header (includes size check via common::jwt)
        let header = extract_header(token).map_err(|e| {
            tracing::debug!(target: "api.auth.jwt", error = ?e, "Token header extraction failed");
            AuthError::InvalidToken(e.cause().to_string())
        })?;

        // 2. Algorithm allow-list, then key lookup
        let algorithm = Algorithm::from_str(&header.alg)
            .ok()
            .filter(|alg| self.settings.allowed_algorithms.contains(alg))
            .ok_or_else(|| AuthError::InvalidToken("algorithm not allowed".to_string()))?;

        let key = self.key_set.resolve(&header.kid).await?;

        // 3. Declared algorithm must match the key
        if key.algorithm() != algorithm {
            tracing::warn!(
                target: "api.auth.jwt",
                header_alg = ?algorithm,
                key_alg = ?key.algorithm(),
                "Token algorithm does not match key"
            );
            return Err(AuthError::InvalidToken(
                "algorithm does not match key".to_string(),
            ));
        }

        // 4. Unverified expiry peek; can only reject
        let exp = peek_expiry(token)
            .map_err(|e| AuthError::InvalidToken(e.cause().to_string()))?;
        if let Some(exp) = exp {
            if is_expired_at(exp, self.settings.leeway, chrono::Utc::now().timestamp()) {
                return Err(AuthError::Expired);
            }
        }

        // 5. Signature and registered claims
        let claims = self.verify(token, &key, issuer, audience)?;

        // 6. Issued-at
        if let Some(iat) = claims.iat {
            validate_iat(iat, self.settings.leeway).map_err(|e| {
                tracing::debug!(target: "api.auth.jwt", error = ?e, "Token iat validation failed");
                AuthError::InvalidToken(e.cause().to_string())
            })?;
        }

        // 7. Email
        let email = claims.email.filter(|e| !e.is_empty());
        if email.is_none() && self.settings.require_email {
            return Err(AuthError::InvalidToken("email claim missing".to_string()));
        }

        tracing::debug!(target: "api.auth.jwt", has_email = email.is_some(), "Token validated successfully");
        Ok(Principal::new(claims.sub, email))
    }

    fn required_claims(&self) -> Result<(&str, &str), AuthError> {
        match (
            self.settings.issuer.as_deref(),
            self.settings.audience.as_deref(),
        ) {
            (Some(issuer), Some(audience)) => Ok((issuer, audience)),
            (None, _) => {
                tracing::error!(target: "api.auth.jwt", "AUTH_ISSUER is not configured");
                Err(AuthError::Config("issuer is not configured".to_string()))
            }
            (_, None) => {
                tracing::error!(target: "api.auth.jwt", "API_AUDIENCE is not configured");
                Err(AuthError::Config("audience is not configured".to_string()))
            }
        }
    }

    fn verify(
        &self,
        token: &str,
        key: &SigningKey,
        issuer: &str,
        audience: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        let mut validation = Validation::new(key.algorithm());
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.settings.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let data = decode::<VerifiedClaims>(token, key.decoding_key(), &validation).map_err(|e| {
            tracing::debug!(target: "api.auth.jwt", error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidToken("invalid signature".to_string()),
                ErrorKind::InvalidIssuer => AuthError::InvalidToken("issuer mismatch".to_string()),
                ErrorKind::InvalidAudience => AuthError::InvalidToken("audience mismatch".to_string()),
                ErrorKind::ImmatureSignature => AuthError::InvalidToken("token not yet valid".to_string()),
                ErrorKind::MissingRequiredClaim(claim) => {
                    AuthError::InvalidToken(format!("missing required claim {claim}"))
                }
                _ => AuthError::InvalidToken("token verification failed".to_string()),
            }
        })?;

        Ok(data.claims)
    }
}
