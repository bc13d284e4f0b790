//! Key-set cache for the identity provider's public signing keys.
//!
//! The cache fetches the JWKS document once and memoizes the parsed key set
//! for the lifetime of the process (or until `invalidate`, or an optional
//! TTL). Concurrent first-use callers share a single fetch.
//!
//! # Security
//!
//! - Only RSA signature keys are accepted; other key types are skipped
//! - Key material never appears in Debug output or logs
//! - A missing JWKS URL is reported before any network I/O
//! - HTTPS should be used in production (enforced by deployment config)

use crate::auth::AuthError;
use crate::observability::metrics::record_jwks_fetch;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default HTTP timeout for the JWKS fetch.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cooldown before an unknown `kid` may trigger a refetch.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (must be "RSA").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm (defaults to RS256 when absent).
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (must be "sig" when present).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS document. Keys are kept as raw JSON so one bad entry does not
/// reject the whole document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

/// A verification key ready for signature checks.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Build from a JWK, or explain why it is unusable.
    fn from_jwk(jwk: &Jwk) -> Result<Self, &'static str> {
        if jwk.kty != "RSA" {
            return Err("unsupported key type");
        }
        if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
            return Err("key is not for signatures");
        }

        let key_id = match jwk.kid.as_deref() {
            Some(kid) if !kid.is_empty() => kid.to_string(),
            _ => return Err("missing kid"),
        };

        let algorithm = match jwk.alg.as_deref() {
            None => Algorithm::RS256,
            Some(name) => match Algorithm::from_str(name) {
                Ok(
                    alg @ (Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512),
                ) => alg,
                _ => return Err("unsupported algorithm"),
            },
        };

        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            return Err("missing RSA components");
        };
        if n.is_empty() || e.is_empty() {
            return Err("empty RSA components");
        }

        let decoding_key =
            DecodingKey::from_rsa_components(n, e).map_err(|_| "malformed RSA components")?;

        Ok(Self {
            key_id,
            algorithm,
            decoding_key,
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Immutable set of verification keys indexed by key id.
#[derive(Debug, Default)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
    index: HashMap<String, usize>,
}

impl SigningKeySet {
    /// Parse a JWKS document. Unusable keys are skipped; for duplicate key
    /// ids the first occurrence wins.
    pub fn from_document(document: JwksDocument) -> Self {
        let mut set = Self::default();

        for raw in document.keys {
            let jwk: Jwk = match serde_json::from_value(raw) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::debug!(target: "api.auth.jwks", error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };

            match SigningKey::from_jwk(&jwk) {
                Ok(key) => {
                    if set.index.contains_key(&key.key_id) {
                        tracing::debug!(target: "api.auth.jwks", kid = %key.key_id, "Skipping duplicate kid");
                        continue;
                    }
                    set.index.insert(key.key_id.clone(), set.keys.len());
                    set.keys.push(key);
                }
                Err(reason) => {
                    tracing::debug!(
                        target: "api.auth.jwks",
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        reason,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        set
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.index.get(kid).and_then(|&i| self.keys.get(i))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in document order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(SigningKey::key_id)
    }
}

/// Memoized key set with the instant it was fetched.
struct CachedKeySet {
    keys: Arc<SigningKeySet>,
    fetched_at: Instant,
}

/// Process-wide cache of the identity provider's signing keys.
///
/// Shared by `Arc`. Reads take a read lock; fetches are serialized by a
/// separate async mutex so concurrent misses result in one request.
pub struct KeySetCache {
    /// URL of the JWKS endpoint. `None` means authentication is unconfigured.
    jwks_url: Option<String>,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Memoized key set.
    cached: RwLock<Option<CachedKeySet>>,

    /// Serializes fetches.
    fetch_lock: Mutex<()>,

    /// Optional lifetime of a fetched key set.
    ttl: Option<Duration>,

    /// Minimum key set age before an unknown kid triggers a refetch.
    refresh_cooldown: Duration,
}

impl KeySetCache {
    /// Create a cache for `jwks_url` that never expires on its own.
    pub fn new(jwks_url: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "api.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cached: RwLock::new(None),
            fetch_lock: Mutex::new(()),
            ttl: None,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
        }
    }

    /// Expire the memoized key set after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the minimum key set age before an unknown kid triggers a refetch.
    #[must_use]
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    /// Return the key set, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if no JWKS URL is configured (no I/O is
    /// attempted), `AuthError::Fetch` if the document cannot be retrieved.
    #[instrument(skip_all)]
    pub async fn get_key_set(&self) -> Result<Arc<SigningKeySet>, AuthError> {
        let url = self.url()?;

        if let Some(keys) = self.current().await {
            return Ok(keys);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have completed the fetch while we waited
        if let Some(keys) = self.current().await {
            return Ok(keys);
        }

        self.fetch_and_store(url).await
    }

    /// Resolve the verification key for `kid`.
    ///
    /// An unknown kid triggers one refetch if the cached set is older than
    /// the refresh cooldown, to pick up key rotations.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnknownKey` if no key matches, plus the errors of
    /// [`KeySetCache::get_key_set`].
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, AuthError> {
        let keys = self.get_key_set().await?;
        if let Some(key) = keys.get(kid) {
            tracing::debug!(target: "api.auth.jwks", kid = %kid, "JWKS cache hit");
            return Ok(key.clone());
        }

        let keys = self.refresh_for_unknown_kid(&keys).await?;
        if let Some(key) = keys.get(kid) {
            return Ok(key.clone());
        }

        tracing::warn!(target: "api.auth.jwks", kid = %kid, "Key not found in JWKS");
        Err(AuthError::UnknownKey {
            kid: kid.to_string(),
        })
    }

    /// Drop the memoized key set; the next call refetches.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
        tracing::debug!(target: "api.auth.jwks", "JWKS cache invalidated");
    }

    fn url(&self) -> Result<&str, AuthError> {
        self.jwks_url.as_deref().ok_or_else(|| {
            tracing::error!(target: "api.auth.jwks", "AUTH_SERVER_JWKS_URL is not configured");
            AuthError::Config("JWKS URL is not configured".to_string())
        })
    }

    /// The memoized key set, if present and within its TTL.
    async fn current(&self) -> Option<Arc<SigningKeySet>> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|c| self.ttl.map_or(true, |ttl| c.fetched_at.elapsed() < ttl))
            .map(|c| Arc::clone(&c.keys))
    }

    async fn refresh_for_unknown_kid(
        &self,
        seen: &Arc<SigningKeySet>,
    ) -> Result<Arc<SigningKeySet>, AuthError> {
        let url = self.url()?;
        let _guard = self.fetch_lock.lock().await;

        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref() {
                if !Arc::ptr_eq(&c.keys, seen) {
                    // Someone else refreshed while we waited
                    return Ok(Arc::clone(&c.keys));
                }
                if c.fetched_at.elapsed() < self.refresh_cooldown {
                    tracing::debug!(target: "api.auth.jwks", "Unknown kid within refresh cooldown");
                    return Ok(Arc::clone(&c.keys));
                }
            }
        }

        tracing::info!(target: "api.auth.jwks", "Unknown kid, refetching JWKS");
        self.fetch_and_store(url).await
    }

    /// Fetch, parse and store the key set. Caller must hold `fetch_lock`.
    async fn fetch_and_store(&self, url: &str) -> Result<Arc<SigningKeySet>, AuthError> {
        let start = Instant::now();
        let result = self.fetch(url).await;
        record_jwks_fetch(
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );

        let keys = Arc::new(result?);

        tracing::info!(
            target: "api.auth.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        let mut cached = self.cached.write().await;
        *cached = Some(CachedKeySet {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });

        Ok(keys)
    }

    async fn fetch(&self, url: &str) -> Result<SigningKeySet, AuthError> {
        tracing::debug!(target: "api.auth.jwks", url = %url, "Fetching JWKS");

        let response = self.http_client.get(url).send().await.map_err(|e| {
            tracing::error!(target: "api.auth.jwks", error = %e, "Failed to fetch JWKS");
            AuthError::Fetch(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "api.auth.jwks",
                status = %status,
                "JWKS endpoint returned error"
            );
            return Err(AuthError::Fetch(format!("status {status}")));
        }

        let document: JwksDocument = response.json().await.map_err(|e| {
            tracing::error!(target: "api.auth.jwks", error = %e, "Failed to parse JWKS response");
            AuthError::Fetch(format!("unparseable document: {e}"))
        })?;

        Ok(SigningKeySet::from_document(document))
    }
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("jwks_url", &self.jwks_url)
            .field("ttl", &self.ttl)
            .field("refresh_cooldown", &self.refresh_cooldown)
            .finish_non_exhaustive()
    }
}
