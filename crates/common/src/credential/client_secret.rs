//! Service principal credential (OAuth 2.0 client credentials grant).

use super::{
    build_http_client, error_for_status, expires_in_to_instant, AccessToken, CredentialError,
    CredentialSource, DEFAULT_HTTP_TIMEOUT,
};
use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default identity provider authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const TENANT_ID_VAR: &str = "AZURE_TENANT_ID";
const CLIENT_ID_VAR: &str = "AZURE_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "AZURE_CLIENT_SECRET";
const AUTHORITY_HOST_VAR: &str = "AZURE_AUTHORITY_HOST";

/// OAuth 2.0 token response from the v2 token endpoint.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: SecretString,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Acquires tokens for a service principal using a client secret.
#[derive(Clone)]
pub struct ClientSecretCredential {
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    http_client: reqwest::Client,
}

impl ClientSecretCredential {
    /// Create a credential against the default authority.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn new(
        tenant_id: String,
        client_id: String,
        client_secret: SecretString,
    ) -> Result<Self, CredentialError> {
        Self::with_timeout(tenant_id, client_id, client_secret, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a credential with a custom HTTP timeout.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn with_timeout(
        tenant_id: String,
        client_id: String,
        client_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant_id,
            client_id,
            client_secret,
            http_client: build_http_client(timeout)?,
        })
    }

    /// Override the authority host (sovereign clouds, tests).
    #[must_use]
    pub fn with_authority_host(mut self, authority_host: impl Into<String>) -> Self {
        self.authority_host = authority_host.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from a variable map.
    ///
    /// Returns `Ok(None)` when the tenant, client id or secret is absent, so
    /// a chain can skip this source without treating it as a failure.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Option<Self>, CredentialError> {
        let non_empty = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
            non_empty(TENANT_ID_VAR),
            non_empty(CLIENT_ID_VAR),
            non_empty(CLIENT_SECRET_VAR),
        ) else {
            return Ok(None);
        };

        let mut credential =
            Self::new(tenant_id, client_id, SecretString::from(client_secret))?;
        if let Some(authority_host) = non_empty(AUTHORITY_HOST_VAR) {
            credential = credential.with_authority_host(authority_host);
        }
        Ok(Some(credential))
    }

    /// Build from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn from_env() -> Result<Option<Self>, CredentialError> {
        Self::from_vars(&std::env::vars().collect())
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        )
    }
}

impl std::fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("authority_host", &self.authority_host)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSource for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "client_secret"
    }

    #[instrument(skip_all, fields(client_id = %self.client_id))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let url = self.token_url();

        debug!(
            target: "common.credential",
            url = %url,
            scope,
            "Requesting token with client credentials"
        );

        let form_body = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(&url)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.credential", error = %e, "HTTP request failed");
                CredentialError::HttpError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(error_for_status(response, self.name()).await);
        }

        let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.credential", error = %e, "Failed to parse token response");
            CredentialError::InvalidResponse(e.to_string())
        })?;

        debug!(
            target: "common.credential",
            expires_in_secs = token_response.expires_in,
            "Token acquired with client credentials"
        );

        Ok(AccessToken::new(
            token_response.access_token,
            expires_in_to_instant(token_response.expires_in),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCOPE: &str = "https://database.windows.net/.default";

    fn credential(base_url: &str) -> ClientSecretCredential {
        ClientSecretCredential::new(
            "tenant-1".to_string(),
            "client-1".to_string(),
            SecretString::from("secret-value"),
        )
        .unwrap()
        .with_authority_host(base_url)
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_requires_all_three() {
        let partial = vars(&[(TENANT_ID_VAR, "t"), (CLIENT_ID_VAR, "c")]);
        assert!(ClientSecretCredential::from_vars(&partial).unwrap().is_none());

        let empty_secret = vars(&[
            (TENANT_ID_VAR, "t"),
            (CLIENT_ID_VAR, "c"),
            (CLIENT_SECRET_VAR, ""),
        ]);
        assert!(ClientSecretCredential::from_vars(&empty_secret)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_vars_with_authority_host() {
        let full = vars(&[
            (TENANT_ID_VAR, "tenant-x"),
            (CLIENT_ID_VAR, "c"),
            (CLIENT_SECRET_VAR, "s"),
            (AUTHORITY_HOST_VAR, "https://login.example.test/"),
        ]);
        let credential = ClientSecretCredential::from_vars(&full).unwrap().unwrap();
        assert_eq!(
            credential.token_url(),
            "https://login.example.test/tenant-x/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = credential("https://login.example.test");
        let debug_str = format!("{credential:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret-value"));
        assert!(debug_str.contains("client-1"));
    }

    #[test]
    fn test_oauth_response_debug_redacts_token() {
        let response = OAuthTokenResponse {
            access_token: SecretString::from("eyJhbGciOiJSUzI1NiJ9.payload.sig"),
            token_type: Some("Bearer".to_string()),
            expires_in: 3599,
        };
        let debug_str = format!("{response:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("eyJhbGciOiJSUzI1NiJ9"));
    }

    #[tokio::test]
    async fn test_get_token_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("scope=https%3A%2F%2Fdatabase.windows.net%2F.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "db-token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let token = credential(&mock_server.uri()).get_token(SCOPE).await.unwrap();

        assert_eq!(token.token().expose_secret(), "db-token");
        assert!(token.expires_on() > chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_get_token_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":"invalid_client","trace":"secret-value"}"#),
            )
            .mount(&mock_server)
            .await;

        let err = credential(&mock_server.uri())
            .get_token(SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::AuthenticationRejected(_)));
        assert!(!err.to_string().contains("secret-value"));
    }

    #[tokio::test]
    async fn test_get_token_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = credential(&mock_server.uri())
            .get_token(SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::HttpError(_)));
    }

    #[tokio::test]
    async fn test_get_token_invalid_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let err = credential(&mock_server.uri())
            .get_token(SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::InvalidResponse(_)));
    }
}
