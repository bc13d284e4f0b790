//! Data API configuration.
//!
//! Configuration is loaded from environment variables. No secret is held
//! here: database credentials come from the ambient identity at connect time.
//!
//! Authentication settings (JWKS URL, issuer, audience) are optional at
//! startup. Their absence surfaces as a configuration error on the first
//! protected request, so the service can still answer health probes.

use common::jwt::MAX_CLOCK_SKEW;
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default ODBC driver name placed in the connection string.
pub const DEFAULT_ODBC_DRIVER: &str = "ODBC Driver 18 for SQL Server";

/// Default cooldown between refetches triggered by an unknown `kid`.
pub const DEFAULT_JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 60;

/// Default refresh margin for cached database tokens.
pub const DEFAULT_DB_TOKEN_REFRESH_MARGIN_SECONDS: u64 = 300;

/// Default whole-request timeout. Exceeds the 30 s connection bound plus the
/// credential chain's worst case (three sources at 10 s each).
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 90;

/// Origins allowed by default (local dev servers and the deployed frontend).
pub const DEFAULT_CORS_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "https://react-test.company.com",
];

/// Signature algorithms that may be enabled. Symmetric and `none` are not.
const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Data API configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// URL of the identity provider's JWKS document.
    pub jwks_url: Option<String>,

    /// Expected `iss` claim.
    pub issuer: Option<String>,

    /// Expected `aud` claim.
    pub audience: Option<String>,

    /// Accepted token signature algorithms (default: RS256).
    pub allowed_algorithms: Vec<Algorithm>,

    /// Clock leeway applied to `exp`, `nbf` and `iat` (default: 0).
    pub jwt_leeway_seconds: u64,

    /// Reject tokens that carry no `email` claim.
    pub require_email: bool,

    /// Optional lifetime of a fetched key set. `None` keeps it until invalidated.
    pub jwks_cache_ttl: Option<Duration>,

    /// Minimum age of the key set before an unknown `kid` triggers a refetch.
    pub jwks_refresh_cooldown: Duration,

    /// Database server host name.
    pub sql_server_name: Option<String>,

    /// Database name.
    pub sql_database_name: Option<String>,

    /// DRIVER value in the connection string.
    pub odbc_driver: String,

    /// Reuse database access tokens until they near expiry.
    pub db_token_cache_enabled: bool,

    /// How long before expiry a cached database token is replaced.
    pub db_token_refresh_margin: Duration,

    /// Origins allowed to make credentialed cross-origin requests.
    pub cors_allowed_origins: Vec<String>,

    /// Upper bound on a whole HTTP request (default: 90 seconds).
    pub request_timeout: Duration,

    /// Seconds to wait between the shutdown signal and closing the listener.
    pub drain_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid boolean configuration: {0}")]
    InvalidBoolean(String),

    #[error("Invalid integer configuration: {0}")]
    InvalidInteger(String),

    #[error("Invalid JWT leeway configuration: {0}")]
    InvalidJwtLeeway(String),

    #[error("Invalid JWT algorithm configuration: {0}")]
    InvalidAlgorithms(String),

    #[error("Invalid CORS configuration: {0}")]
    InvalidCorsOrigin(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwks_url = optional(vars, "AUTH_SERVER_JWKS_URL");
        let issuer = optional(vars, "AUTH_ISSUER");
        let audience = optional(vars, "API_AUDIENCE");

        let allowed_algorithms = match vars.get("JWT_ALLOWED_ALGORITHMS") {
            Some(value) => parse_algorithms(value)?,
            None => vec![Algorithm::RS256],
        };

        let jwt_leeway_seconds = parse_u64(vars, "JWT_LEEWAY_SECONDS", 0)?;
        if jwt_leeway_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidJwtLeeway(format!(
                "JWT_LEEWAY_SECONDS must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                jwt_leeway_seconds
            )));
        }

        let require_email = parse_bool(vars, "AUTH_REQUIRE_EMAIL", false)?;

        let jwks_cache_ttl = match vars.get("JWKS_CACHE_TTL_SECONDS") {
            Some(_) => {
                let seconds = parse_u64(vars, "JWKS_CACHE_TTL_SECONDS", 0)?;
                if seconds == 0 {
                    return Err(ConfigError::InvalidInteger(
                        "JWKS_CACHE_TTL_SECONDS must be greater than 0 when set".to_string(),
                    ));
                }
                Some(Duration::from_secs(seconds))
            }
            None => None,
        };

        let jwks_refresh_cooldown = Duration::from_secs(parse_u64(
            vars,
            "JWKS_REFRESH_COOLDOWN_SECONDS",
            DEFAULT_JWKS_REFRESH_COOLDOWN_SECONDS,
        )?);

        let sql_server_name = optional(vars, "SQL_SERVER_NAME");
        let sql_database_name = optional(vars, "SQL_DATABASE_NAME");
        let odbc_driver =
            optional(vars, "SQL_ODBC_DRIVER").unwrap_or_else(|| DEFAULT_ODBC_DRIVER.to_string());

        let db_token_cache_enabled = parse_bool(vars, "DB_TOKEN_CACHE_ENABLED", false)?;
        let db_token_refresh_margin = Duration::from_secs(parse_u64(
            vars,
            "DB_TOKEN_REFRESH_MARGIN_SECONDS",
            DEFAULT_DB_TOKEN_REFRESH_MARGIN_SECONDS,
        )?);

        let cors_allowed_origins = match vars.get("CORS_ALLOWED_ORIGINS") {
            Some(value) => parse_origins(value)?,
            None => DEFAULT_CORS_ALLOWED_ORIGINS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        };

        let request_timeout_seconds = parse_u64(
            vars,
            "API_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;
        if request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidInteger(
                "API_REQUEST_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }
        let request_timeout = Duration::from_secs(request_timeout_seconds);

        let drain_seconds = parse_u64(vars, "API_DRAIN_SECONDS", 0)?;

        Ok(Config {
            bind_address,
            jwks_url,
            issuer,
            audience,
            allowed_algorithms,
            jwt_leeway_seconds,
            require_email,
            jwks_cache_ttl,
            jwks_refresh_cooldown,
            sql_server_name,
            sql_database_name,
            odbc_driver,
            db_token_cache_enabled,
            db_token_refresh_margin,
            cors_allowed_origins,
            request_timeout,
            drain_seconds,
        })
    }
}

/// Non-empty, trimmed value of `key`.
fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = vars.get(key) else {
        return Ok(default);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean(format!(
            "{key} must be true or false, got '{value}'"
        ))),
    }
}

fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let Some(value) = vars.get(key) else {
        return Ok(default);
    };

    value.trim().parse().map_err(|e| {
        ConfigError::InvalidInteger(format!(
            "{key} must be a valid non-negative integer, got '{value}': {e}"
        ))
    })
}

fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();

    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let algorithm = Algorithm::from_str(name).map_err(|_| {
            ConfigError::InvalidAlgorithms(format!("unknown algorithm '{name}'"))
        })?;

        if !SUPPORTED_ALGORITHMS.contains(&algorithm) {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "algorithm '{name}' is not an RSA signature algorithm"
            )));
        }

        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }

    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithms(
            "JWT_ALLOWED_ALGORITHMS must name at least one algorithm".to_string(),
        ));
    }

    Ok(algorithms)
}

fn parse_origins(value: &str) -> Result<Vec<String>, ConfigError> {
    let origins: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect();

    for origin in &origins {
        if origin == "*" {
            return Err(ConfigError::InvalidCorsOrigin(
                "wildcard origin cannot be combined with credentials".to_string(),
            ));
        }
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(ConfigError::InvalidCorsOrigin(format!(
                "origin '{origin}' must start with http:// or https://"
            )));
        }
    }

    Ok(origins)
}
