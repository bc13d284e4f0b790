//! Identity token broker.
//!
//! Delegates to a [`CredentialSource`] for every request by default. Caching
//! is opt-in: when enabled, a token is reused only while it has more than the
//! refresh margin (plus a clock drift allowance) left before expiry.
//!
//! There are no retries here; a failed acquisition goes straight back to the
//! caller.

use crate::config::Config;
use crate::observability::metrics::record_credential_acquisition;
use chrono::Utc;
use common::credential::{AccessToken, CredentialError, CredentialSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// Scope for Azure SQL Database access tokens.
pub const DATABASE_SCOPE: &str = "https://database.windows.net/.default";

/// Extra margin for clock differences with the identity provider.
const CLOCK_DRIFT_MARGIN: Duration = Duration::from_secs(30);

struct TokenCache {
    refresh_margin: Duration,
    tokens: RwLock<HashMap<String, AccessToken>>,
}

/// Obtains access tokens for resource scopes.
pub struct TokenBroker {
    source: Arc<dyn CredentialSource>,
    cache: Option<TokenCache>,
}

impl TokenBroker {
    /// Broker that fetches a fresh token on every call.
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    /// Reuse tokens until they are within `refresh_margin` of expiry.
    #[must_use]
    pub fn with_cache(mut self, refresh_margin: Duration) -> Self {
        self.cache = Some(TokenCache {
            refresh_margin,
            tokens: RwLock::new(HashMap::new()),
        });
        self
    }

    /// Build according to `DB_TOKEN_CACHE_ENABLED` / `DB_TOKEN_REFRESH_MARGIN_SECONDS`.
    pub fn from_config(source: Arc<dyn CredentialSource>, config: &Config) -> Self {
        let broker = Self::new(source);
        if config.db_token_cache_enabled {
            broker.with_cache(config.db_token_refresh_margin)
        } else {
            broker
        }
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Get an access token for `scope`.
    ///
    /// # Errors
    ///
    /// Returns the credential source's `CredentialError` unchanged.
    #[instrument(skip_all, fields(scope = %scope, source = self.source.name()))]
    pub async fn get_access_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        if let Some(cache) = &self.cache {
            let margin = cache.refresh_margin.saturating_add(CLOCK_DRIFT_MARGIN);
            let tokens = cache.tokens.read().await;
            if let Some(token) = tokens.get(scope) {
                if !token.expires_within(margin, Utc::now()) {
                    tracing::debug!(target: "api.identity", "Using cached access token");
                    record_credential_acquisition(self.source.name(), "cached", Duration::ZERO);
                    return Ok(token.clone());
                }
            }
        }

        let start = Instant::now();
        let result = self.source.get_token(scope).await;
        let elapsed = start.elapsed();

        let token = match result {
            Ok(token) => {
                record_credential_acquisition(self.source.name(), "success", elapsed);
                token
            }
            Err(e) => {
                record_credential_acquisition(self.source.name(), "error", elapsed);
                tracing::warn!(target: "api.identity", error = %e, "Access token acquisition failed");
                return Err(e);
            }
        };

        tracing::debug!(
            target: "api.identity",
            expires_on = %token.expires_on(),
            "Access token acquired"
        );

        if let Some(cache) = &self.cache {
            let mut tokens = cache.tokens.write().await;
            tokens.insert(scope.to_string(), token.clone());
        }

        Ok(token)
    }

    /// Drop any cached tokens.
    pub async fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.tokens.write().await.clear();
        }
    }
}

impl std::fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("source", &self.source.name())
            .field(
                "refresh_margin",
                &self.cache.as_ref().map(|c| c.refresh_margin),
            )
            .finish()
    }
}
