//! Managed identity credential.
//!
//! Hosted environments (App Service, Container Apps, Functions) expose a
//! local identity endpoint through `IDENTITY_ENDPOINT` / `IDENTITY_HEADER`.
//! Virtual machines expose the instance metadata service instead.
//!
//! Off Azure the metadata address does not answer. The first failed connect
//! is remembered so later calls fail fast instead of waiting on it again.

use super::{
    build_http_client, epoch_to_instant, error_for_status, scope_to_resource, AccessToken,
    CredentialError, CredentialSource, DEFAULT_HTTP_TIMEOUT,
};
use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Instance metadata service token endpoint.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";
const IDENTITY_HEADER_VAR: &str = "IDENTITY_HEADER";
const CLIENT_ID_VAR: &str = "AZURE_CLIENT_ID";

#[derive(Clone)]
enum Endpoint {
    AppService { url: String, header: SecretString },
    Imds { url: String },
}

/// Token response shared by both endpoint flavors.
///
/// `expires_on` arrives as a string of epoch seconds, occasionally as a number.
#[derive(Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: SecretString,
    #[serde(deserialize_with = "deserialize_epoch")]
    expires_on: i64,
}

impl std::fmt::Debug for ManagedIdentityTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedIdentityTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

fn deserialize_epoch<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Epoch {
        Number(i64),
        Text(String),
    }

    match Epoch::deserialize(deserializer)? {
        Epoch::Number(n) => Ok(n),
        Epoch::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Acquires tokens from the platform's managed identity endpoint.
///
/// Clones share the metadata-service reachability flag.
#[derive(Clone)]
pub struct ManagedIdentityCredential {
    endpoint: Endpoint,
    client_id: Option<String>,
    http_client: reqwest::Client,
    imds_unreachable: Arc<AtomicBool>,
}

impl ManagedIdentityCredential {
    /// Build from a variable map.
    ///
    /// Uses the hosted identity endpoint when both `IDENTITY_ENDPOINT` and
    /// `IDENTITY_HEADER` are present, otherwise the metadata service.
    /// `AZURE_CLIENT_ID` selects a user-assigned identity.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, CredentialError> {
        let non_empty = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        let endpoint = match (
            non_empty(IDENTITY_ENDPOINT_VAR),
            non_empty(IDENTITY_HEADER_VAR),
        ) {
            (Some(url), Some(header)) => Endpoint::AppService {
                url,
                header: SecretString::from(header),
            },
            _ => Endpoint::Imds {
                url: IMDS_ENDPOINT.to_string(),
            },
        };

        Ok(Self {
            endpoint,
            client_id: non_empty(CLIENT_ID_VAR),
            http_client: build_http_client(DEFAULT_HTTP_TIMEOUT)?,
            imds_unreachable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Metadata-service credential against a custom URL.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn imds(url: impl Into<String>, timeout: Duration) -> Result<Self, CredentialError> {
        Ok(Self {
            endpoint: Endpoint::Imds { url: url.into() },
            client_id: None,
            http_client: build_http_client(timeout)?,
            imds_unreachable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Hosted-identity credential against a custom URL and header secret.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if the HTTP client cannot be built.
    pub fn app_service(
        url: impl Into<String>,
        header: SecretString,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            endpoint: Endpoint::AppService {
                url: url.into(),
                header,
            },
            client_id: None,
            http_client: build_http_client(timeout)?,
            imds_unreachable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Select a user-assigned identity by client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn request(&self, resource: &str) -> reqwest::RequestBuilder {
        let mut query: Vec<(&str, &str)> = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        match &self.endpoint {
            Endpoint::AppService { url, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.http_client
                    .get(url)
                    .query(&query)
                    .header("X-IDENTITY-HEADER", header.expose_secret())
            }
            Endpoint::Imds { url } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.http_client
                    .get(url)
                    .query(&query)
                    .header("Metadata", "true")
            }
        }
    }

    fn is_imds(&self) -> bool {
        matches!(self.endpoint, Endpoint::Imds { .. })
    }

    /// True once the metadata service has refused or timed out a connect.
    #[must_use]
    pub fn imds_marked_unreachable(&self) -> bool {
        self.is_imds() && self.imds_unreachable.load(Ordering::Acquire)
    }

    fn endpoint_kind(&self) -> &'static str {
        match self.endpoint {
            Endpoint::AppService { .. } => "app_service",
            Endpoint::Imds { .. } => "imds",
        }
    }
}

impl std::fmt::Debug for ManagedIdentityCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let url = match &self.endpoint {
            Endpoint::AppService { url, .. } | Endpoint::Imds { url } => url,
        };
        f.debug_struct("ManagedIdentityCredential")
            .field("endpoint_kind", &self.endpoint_kind())
            .field("url", url)
            .field("client_id", &self.client_id)
            .field("imds_unreachable", &self.imds_marked_unreachable())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSource for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    #[instrument(skip_all, fields(endpoint_kind = self.endpoint_kind()))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        if self.imds_marked_unreachable() {
            return Err(CredentialError::NotConfigured(
                "instance metadata service is unreachable".to_string(),
            ));
        }

        let resource = scope_to_resource(scope);

        debug!(
            target: "common.credential",
            resource,
            user_assigned = self.client_id.is_some(),
            "Requesting managed identity token"
        );

        let response = self.request(resource).send().await.map_err(|e| {
            if self.is_imds()
                && (e.is_connect() || e.is_timeout())
                && !self.imds_unreachable.swap(true, Ordering::AcqRel)
            {
                debug!(
                    target: "common.credential",
                    error = %e,
                    "Instance metadata service unreachable, skipping it from now on"
                );
            }
            CredentialError::HttpError(e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(error_for_status(response, self.name()).await);
        }

        let token_response: ManagedIdentityTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.credential", error = %e, "Failed to parse managed identity response");
            CredentialError::InvalidResponse(e.to_string())
        })?;

        let expires_on = epoch_to_instant(token_response.expires_on)?;

        debug!(
            target: "common.credential",
            expires_on = %expires_on,
            "Managed identity token acquired"
        );

        Ok(AccessToken::new(token_response.access_token, expires_on))
    }
}
