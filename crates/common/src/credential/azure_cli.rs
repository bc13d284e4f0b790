//! Developer credential backed by the `az` command-line login.

use super::{epoch_to_instant, AccessToken, CredentialError, CredentialSource};
use crate::secret::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Default upper bound for the CLI invocation.
const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
const DEFAULT_PROGRAM: &str = "az.cmd";
#[cfg(not(windows))]
const DEFAULT_PROGRAM: &str = "az";

/// Format of the legacy `expiresOn` field (local time, no offset).
const LOCAL_EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// `az account get-access-token --output json` payload.
///
/// Newer CLI versions add `expires_on` (epoch seconds); older ones only
/// report `expiresOn` in local time.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: SecretString,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl std::fmt::Debug for CliTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .field("expires_on_epoch", &self.expires_on_epoch)
            .finish()
    }
}

/// Acquires tokens through the Azure CLI's cached developer login.
#[derive(Debug, Clone)]
pub struct AzureCliCredential {
    program: String,
    timeout: Duration,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureCliCredential {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout: DEFAULT_CLI_TIMEOUT,
        }
    }

    /// Use a different executable (tests, non-standard installs).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Scopes are passed as a process argument; keep them to URI characters.
fn is_valid_scope(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/'))
}

/// Parse the CLI's JSON output into an access token.
fn parse_cli_output(stdout: &str) -> Result<AccessToken, CredentialError> {
    let response: CliTokenResponse = serde_json::from_str(stdout)
        .map_err(|e| CredentialError::InvalidResponse(format!("CLI output: {e}")))?;

    let expires_on = match (response.expires_on_epoch, response.expires_on.as_deref()) {
        (Some(epoch), _) => epoch_to_instant(epoch)?,
        (None, Some(local)) => parse_local_expiry(local)?,
        (None, None) => {
            return Err(CredentialError::InvalidResponse(
                "CLI output has no expiry".to_string(),
            ))
        }
    };

    Ok(AccessToken::new(response.access_token, expires_on))
}

fn parse_local_expiry(value: &str) -> Result<DateTime<Utc>, CredentialError> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), LOCAL_EXPIRY_FORMAT)
        .map_err(|e| CredentialError::InvalidResponse(format!("expiresOn '{value}': {e}")))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            CredentialError::InvalidResponse(format!("expiresOn '{value}' is not a local time"))
        })
}

#[async_trait]
impl CredentialSource for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    #[instrument(skip_all)]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        if !is_valid_scope(scope) {
            return Err(CredentialError::NotConfigured(
                "scope contains characters the CLI does not accept".to_string(),
            ));
        }

        debug!(target: "common.credential", program = %self.program, scope, "Invoking CLI");

        let mut command = Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json", "--scope", scope])
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                warn!(target: "common.credential", timeout_secs = self.timeout.as_secs(), "CLI timed out");
                CredentialError::ProcessFailed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                debug!(target: "common.credential", error = %e, "CLI could not be started");
                CredentialError::ProcessFailed(format!("{}: {e}", self.program))
            })?;

        if !output.status.success() {
            // stderr usually says "Please run 'az login'"; keep the first line only
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first_line = stderr.lines().next().unwrap_or_default().trim().to_string();
            debug!(target: "common.credential", status = %output.status, "CLI exited with failure");
            return Err(CredentialError::ProcessFailed(format!(
                "{}: {first_line}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = parse_cli_output(&stdout)?;

        debug!(
            target: "common.credential",
            expires_on = %token.expires_on(),
            "CLI token acquired"
        );

        Ok(token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::secret::ExposeSecret;

    #[test]
    fn test_parse_epoch_expiry() {
        let token = parse_cli_output(
            r#"{
                "accessToken": "cli-token",
                "expiresOn": "2100-01-01 00:00:00.000000",
                "expires_on": 4102444800,
                "subscription": "sub",
                "tenant": "tenant",
                "tokenType": "Bearer"
            }"#,
        )
        .unwrap();

        assert_eq!(token.token().expose_secret(), "cli-token");
        assert_eq!(token.expires_on().timestamp(), 4_102_444_800);
    }

    #[test]
    fn test_parse_local_expiry() {
        let token = parse_cli_output(
            r#"{"accessToken": "cli-token", "expiresOn": "2100-01-01 12:30:00.000000"}"#,
        )
        .unwrap();

        let expected = Local
            .with_ymd_and_hms(2100, 1, 1, 12, 30, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(token.expires_on(), expected);
    }

    #[test]
    fn test_parse_missing_expiry() {
        let err = parse_cli_output(r#"{"accessToken": "cli-token"}"#).unwrap_err();
        assert!(matches!(err, CredentialError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_error_does_not_echo_token() {
        let err =
            parse_cli_output(r#"{"accessToken": "cli-token", "expiresOn": "tomorrow"}"#)
                .unwrap_err();
        assert!(!err.to_string().contains("cli-token"));
    }

    #[test]
    fn test_scope_validation() {
        assert!(is_valid_scope("https://database.windows.net/.default"));
        assert!(!is_valid_scope(""));
        assert!(!is_valid_scope("https://x/.default --debug"));
        assert!(!is_valid_scope("scope;rm"));
    }

    #[tokio::test]
    async fn test_invalid_scope_rejected_before_spawn() {
        let credential = AzureCliCredential::new().with_program("/nonexistent/az");
        let err = credential.get_token("bad scope").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_process_failure() {
        let credential = AzureCliCredential::new().with_program("/nonexistent/az");
        let err = credential
            .get_token("https://database.windows.net/.default")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ProcessFailed(_)));
    }
}
