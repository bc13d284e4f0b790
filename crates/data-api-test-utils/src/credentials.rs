//! Credential sources with fixed behavior.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::credential::{AccessToken, CredentialError, CredentialSource};
use common::secret::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Hands out a fixed token and counts calls.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
    lifetime: Duration,
    fail: bool,
    calls: Arc<AtomicUsize>,
    scopes: Arc<Mutex<Vec<String>>>,
}

impl StaticCredential {
    /// Token valid for one hour.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            lifetime: Duration::hours(1),
            fail: false,
            calls: Arc::default(),
            scopes: Arc::default(),
        }
    }

    /// Token expiring `seconds` from the time of each call.
    pub fn expiring_in(token: &str, seconds: i64) -> Self {
        Self {
            lifetime: Duration::seconds(seconds),
            ..Self::new(token)
        }
    }

    /// Every call fails as if no identity were available.
    pub fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Scopes requested so far, in order.
    pub fn requested_scopes(&self) -> Vec<String> {
        self.scopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().unwrap().push(scope.to_string());

        if self.fail {
            return Err(CredentialError::Unavailable(vec![
                "static: no identity configured".to_string(),
            ]));
        }

        Ok(AccessToken::new(
            SecretString::from(self.token.clone()),
            Utc::now() + self.lifetime,
        ))
    }
}
