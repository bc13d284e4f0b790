//! Test server harness for end-to-end tests.
//!
//! Provides `TestDataApiServer`, a real Data API router bound to a random
//! local port and wired to a mock key-set endpoint, a static credential and
//! a recording driver.

use crate::credentials::StaticCredential;
use crate::mock_driver::MockDriver;
use crate::token_builders::{TEST_AUDIENCE, TEST_ISSUER};
use data_api::auth::{KeySetCache, TokenValidator, ValidatorSettings};
use data_api::config::Config;
use data_api::db::ConnectionOpener;
use data_api::identity::TokenBroker;
use data_api::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Database host placed in the harness configuration.
pub const TEST_SQL_SERVER: &str = "sql.test.local";

/// Database name placed in the harness configuration.
pub const TEST_SQL_DATABASE: &str = "inventory";

/// Harness for spawning the Data API in tests.
///
/// # Example
/// ```rust,ignore
/// let jwks = MockJwksServer::start(&[&keypair]).await;
/// let server = TestDataApiServer::builder(jwks.jwks_url()).spawn().await?;
/// let response = reqwest::get(format!("{}/api/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestDataApiServer {
    addr: SocketAddr,
    config: Config,
    _handle: JoinHandle<()>,
}

/// Options for [`TestDataApiServer`].
pub struct TestServerBuilder {
    vars: HashMap<String, String>,
    credential: StaticCredential,
    driver: MockDriver,
}

impl TestServerBuilder {
    /// Override or add a configuration variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    /// Remove a configuration variable.
    pub fn without_var(mut self, key: &str) -> Self {
        self.vars.remove(key);
        self
    }

    pub fn with_credential(mut self, credential: StaticCredential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_driver(mut self, driver: MockDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Build the app state exactly as the binary does and serve it.
    pub async fn spawn(self) -> Result<TestDataApiServer, anyhow::Error> {
        let config = Config::from_vars(&self.vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let key_set = Arc::new(
            KeySetCache::new(config.jwks_url.clone())
                .with_ttl(config.jwks_cache_ttl)
                .with_refresh_cooldown(config.jwks_refresh_cooldown),
        );
        let validator = Arc::new(TokenValidator::new(
            key_set,
            ValidatorSettings::from_config(&config),
        ));
        let broker = Arc::new(TokenBroker::from_config(Arc::new(self.credential), &config));
        let opener = Arc::new(ConnectionOpener::from_config(
            broker,
            Arc::new(self.driver),
            &config,
        ));

        let state = Arc::new(AppState {
            config: config.clone(),
            validator,
            opener,
        });
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(TestDataApiServer {
            addr,
            config,
            _handle: handle,
        })
    }
}

impl TestDataApiServer {
    /// Builder preconfigured with the test issuer, audience, database
    /// target and no key refresh cooldown.
    pub fn builder(jwks_url: String) -> TestServerBuilder {
        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("AUTH_SERVER_JWKS_URL".to_string(), jwks_url),
            ("AUTH_ISSUER".to_string(), TEST_ISSUER.to_string()),
            ("API_AUDIENCE".to_string(), TEST_AUDIENCE.to_string()),
            ("JWKS_REFRESH_COOLDOWN_SECONDS".to_string(), "0".to_string()),
            ("SQL_SERVER_NAME".to_string(), TEST_SQL_SERVER.to_string()),
            ("SQL_DATABASE_NAME".to_string(), TEST_SQL_DATABASE.to_string()),
        ]);

        TestServerBuilder {
            vars,
            credential: StaticCredential::new("db-access-token"),
            driver: MockDriver::returning(None),
        }
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestDataApiServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
