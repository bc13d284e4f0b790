//! Mock key-set endpoint built on wiremock.

use crate::crypto_fixtures::{jwks_document, TestKeypair};
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key-set document on.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A running mock identity provider key-set endpoint.
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server publishing `keys`.
    pub async fn start(keys: &[&TestKeypair]) -> Self {
        let mock = Self {
            server: MockServer::start().await,
        };
        mock.publish(keys).await;
        mock
    }

    /// Start a server with nothing mounted (every request is a 404).
    pub async fn start_empty() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Replace the published keys. Clears request history.
    pub async fn publish(&self, keys: &[&TestKeypair]) {
        self.publish_document(jwks_document(keys)).await;
    }

    /// Replace the published document with arbitrary JSON.
    pub async fn publish_document(&self, document: Value) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Publish `keys` with a response delay; used to overlap concurrent fetches.
    pub async fn publish_delayed(&self, keys: &[&TestKeypair], delay: Duration) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_document(keys))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Respond to key-set requests with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Full URL of the key-set document.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Number of key-set requests received since the last `publish`/`fail_with`.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }
}
