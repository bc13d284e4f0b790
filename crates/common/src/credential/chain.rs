//! Ordered fallback across credential sources.

use super::{
    AccessToken, AzureCliCredential, ClientSecretCredential, CredentialError, CredentialSource,
    ManagedIdentityCredential,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Tries each source in order and returns the first token obtained.
///
/// The default order is service principal (only when its variables are set),
/// managed identity, then the developer CLI login.
#[derive(Clone)]
pub struct DefaultCredentialChain {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl DefaultCredentialChain {
    /// Chain over an explicit list of sources.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Build the default chain from a variable map.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if an HTTP client cannot be built.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, CredentialError> {
        let mut sources: Vec<Arc<dyn CredentialSource>> = Vec::with_capacity(3);

        if let Some(client_secret) = ClientSecretCredential::from_vars(vars)? {
            sources.push(Arc::new(client_secret));
        }
        sources.push(Arc::new(ManagedIdentityCredential::from_vars(vars)?));
        sources.push(Arc::new(AzureCliCredential::new()));

        Ok(Self::new(sources))
    }

    /// Build the default chain from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotConfigured` if an HTTP client cannot be built.
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Names of the sources in the order they are tried.
    #[must_use]
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for DefaultCredentialChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCredentialChain")
            .field("sources", &self.source_names())
            .finish()
    }
}

#[async_trait]
impl CredentialSource for DefaultCredentialChain {
    fn name(&self) -> &'static str {
        "default_chain"
    }

    #[instrument(skip_all)]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    info!(
                        target: "common.credential",
                        source = source.name(),
                        "Credential source produced a token"
                    );
                    return Ok(token);
                }
                Err(e) => {
                    debug!(
                        target: "common.credential",
                        source = source.name(),
                        error = %e,
                        "Credential source failed, trying next"
                    );
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }

        warn!(
            target: "common.credential",
            attempted = failures.len(),
            "No credential source produced a token"
        );
        Err(CredentialError::Unavailable(failures))
    }
}
