//! ODBC-style connection strings.
//!
//! The opener builds the string handed to the driver; the TDS driver parses
//! it back. The access token never appears here: it travels as a
//! pre-connect attribute.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default SQL Server TCP port.
pub const DEFAULT_PORT: u16 = 1433;

/// Login timeout placed in every connection string.
pub const CONNECTION_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionStringError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} contains a character that is not allowed")]
    ForbiddenCharacter(&'static str),

    #[error("malformed connection string: {0}")]
    Malformed(String),

    #[error("connection string is missing {0}")]
    Missing(&'static str),

    #[error("invalid {key} value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Build the connection string for `server` / `database`.
///
/// Values are inserted verbatim, so characters with meaning in the ODBC
/// syntax (`;`, `{`, `}`) and control characters are rejected.
///
/// # Errors
///
/// Returns `ConnectionStringError` for empty or unsafe values.
pub fn build(driver: &str, server: &str, database: &str) -> Result<String, ConnectionStringError> {
    check_value("DRIVER", driver)?;
    check_value("SERVER", server)?;
    check_value("DATABASE", database)?;

    Ok(format!(
        "DRIVER={{{driver}}};SERVER={server};DATABASE={database};Encrypt=yes;TrustServerCertificate=no;Connection Timeout={CONNECTION_TIMEOUT_SECONDS}"
    ))
}

fn check_value(name: &'static str, value: &str) -> Result<(), ConnectionStringError> {
    if value.trim().is_empty() {
        return Err(ConnectionStringError::Empty(name));
    }
    if value
        .chars()
        .any(|c| matches!(c, ';' | '{' | '}') || c.is_control())
    {
        return Err(ConnectionStringError::ForbiddenCharacter(name));
    }
    Ok(())
}

/// Settings recovered from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub driver: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
}

/// Split the `key=value` pairs that [`build`] produces. Braces around a
/// value are stripped; `build` never lets `;`, `{` or `}` inside one.
/// Keys are lower-cased and the first occurrence wins.
fn split_pairs(input: &str) -> Result<HashMap<String, String>, ConnectionStringError> {
    let mut pairs = HashMap::new();

    for pair in input.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConnectionStringError::Malformed(format!("missing '=' in '{pair}'")))?;
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ConnectionStringError::Malformed("empty key".to_string()));
        }

        let value = value.trim();
        let value = match value.strip_prefix('{') {
            Some(inner) => inner.strip_suffix('}').ok_or_else(|| {
                ConnectionStringError::Malformed(format!("unterminated braces in {key}"))
            })?,
            None => value,
        };
        pairs.entry(key).or_insert_with(|| value.to_string());
    }

    Ok(pairs)
}

fn parse_flag(key: &'static str, value: Option<&String>, default: bool) -> Result<bool, ConnectionStringError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(ConnectionStringError::InvalidValue {
            key,
            value: value.clone(),
        }),
    }
}

/// Parse `SERVER` as `host`, `host,port`, `tcp:host` or `tcp:host,port`.
fn parse_server(value: &str) -> Result<(String, u16), ConnectionStringError> {
    let trimmed = value.trim();
    let without_scheme = trimmed
        .get(..4)
        .filter(|p| p.eq_ignore_ascii_case("tcp:"))
        .and_then(|_| trimmed.get(4..))
        .unwrap_or(trimmed);

    let (host, port) = match without_scheme.split_once(',') {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ConnectionStringError::InvalidValue {
                    key: "SERVER",
                    value: value.to_string(),
                })?;
            (host.trim(), port)
        }
        None => (without_scheme, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(ConnectionStringError::Empty("SERVER"));
    }
    Ok((host.to_string(), port))
}

/// Parse a connection string into driver settings.
///
/// # Errors
///
/// Returns `ConnectionStringError` if the syntax is invalid or `SERVER` is missing.
pub fn parse(input: &str) -> Result<ConnectionParams, ConnectionStringError> {
    let pairs = split_pairs(input)?;

    let server = pairs
        .get("server")
        .ok_or(ConnectionStringError::Missing("SERVER"))?;
    let (host, port) = parse_server(server)?;

    let database = pairs
        .get("database")
        .filter(|d| !d.is_empty())
        .cloned();

    let encrypt = parse_flag("Encrypt", pairs.get("encrypt"), true)?;
    let trust_server_certificate = parse_flag(
        "TrustServerCertificate",
        pairs.get("trustservercertificate"),
        false,
    )?;

    let connect_timeout = match pairs.get("connection timeout") {
        Some(value) => {
            let seconds = value
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConnectionStringError::InvalidValue {
                    key: "Connection Timeout",
                    value: value.clone(),
                })?;
            Duration::from_secs(seconds)
        }
        None => Duration::from_secs(CONNECTION_TIMEOUT_SECONDS),
    };

    Ok(ConnectionParams {
        driver: pairs.get("driver").cloned(),
        host,
        port,
        database,
        encrypt,
        trust_server_certificate,
        connect_timeout,
    })
}
