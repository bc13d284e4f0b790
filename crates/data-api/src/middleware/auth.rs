//! Authentication middleware for protected routes.
//!
//! Extracts the bearer token from the `Authorization` header, validates it
//! with the [`TokenValidator`], and injects the resulting [`Principal`] into
//! request extensions. Unauthenticated routes never reach the validator.

use crate::auth::{Principal, TokenValidator};
use crate::errors::{ApiError, INVALID_TOKEN_MESSAGE};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<TokenValidator>,
}

/// Extract the bearer token from the Authorization header.
///
/// The scheme is matched case-insensitively.
fn extract_bearer_token(req: &Request) -> Result<&str, ApiError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "api.middleware.auth", "Missing Authorization header");
            ApiError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
        })?;

    let invalid_format = || {
        tracing::debug!(target: "api.middleware.auth", "Invalid Authorization header format");
        ApiError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
    };

    let (scheme, token) = auth_header.split_once(' ').ok_or_else(invalid_format)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(invalid_format());
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(invalid_format());
    }
    Ok(token)
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 Unauthorized if the token is missing, malformed, expired or invalid
/// - 503 if the signing keys cannot be fetched
/// - 500 if authentication is not configured
/// - Otherwise continues with the `Principal` in extensions
#[instrument(skip_all, name = "api.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_bearer_token(&req)?;

    let principal = state.validator.validate_bearer(token).await?;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Access to the authenticated caller from a request.
pub trait PrincipalExt {
    /// `None` if the auth middleware did not run for this request.
    fn principal(&self) -> Option<&Principal>;
}

impl<B> PrincipalExt for axum::http::Request<B> {
    fn principal(&self) -> Option<&Principal> {
        self.extensions().get::<Principal>()
    }
}
