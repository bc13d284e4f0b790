//! Authenticated connection opener.
//!
//! Opens one database connection per call:
//!
//! 1. Build the connection string (rejecting unsafe server/database values)
//! 2. Get a database access token from the broker
//! 3. Encode it as the `SQL_COPT_SS_ACCESS_TOKEN` attribute blob
//! 4. Hand string and attribute to the native driver
//!
//! The token is never part of the connection string, and every error that
//! leaves this module has the token text scrubbed out.

use crate::config::Config;
use crate::db::attribute_blob::{AccessTokenBlob, SQL_COPT_SS_ACCESS_TOKEN};
use crate::db::connection_string;
use crate::db::driver::{ConnectionRequest, DbConnection, NativeDriver};
use crate::db::ConnectError;
use crate::identity::{TokenBroker, DATABASE_SCOPE};
use crate::observability::metrics::record_db_connection;
use common::secret::ExposeSecret;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Placeholder substituted for the token in error messages.
const REDACTED: &str = "[REDACTED]";

/// Replace every occurrence of `token` in `message`.
pub fn scrub(message: &str, token: &str) -> String {
    if token.is_empty() {
        return message.to_string();
    }
    message.replace(token, REDACTED)
}

/// Opens authenticated connections through a native driver.
pub struct ConnectionOpener {
    broker: Arc<TokenBroker>,
    driver: Arc<dyn NativeDriver>,
    odbc_driver: String,
    server: Option<String>,
    database: Option<String>,
}

impl ConnectionOpener {
    pub fn new(broker: Arc<TokenBroker>, driver: Arc<dyn NativeDriver>, odbc_driver: String) -> Self {
        Self {
            broker,
            driver,
            odbc_driver,
            server: None,
            database: None,
        }
    }

    /// Target used by [`ConnectionOpener::open_configured`].
    #[must_use]
    pub fn with_target(mut self, server: Option<String>, database: Option<String>) -> Self {
        self.server = server;
        self.database = database;
        self
    }

    pub fn from_config(
        broker: Arc<TokenBroker>,
        driver: Arc<dyn NativeDriver>,
        config: &Config,
    ) -> Self {
        Self::new(broker, driver, config.odbc_driver.clone()).with_target(
            config.sql_server_name.clone(),
            config.sql_database_name.clone(),
        )
    }

    /// Open a connection to the configured `SQL_SERVER_NAME` / `SQL_DATABASE_NAME`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::Config` if either is unset, otherwise the errors
    /// of [`ConnectionOpener::open_authenticated_connection`].
    pub async fn open_configured(&self) -> Result<Box<dyn DbConnection>, ConnectError> {
        let server = self.server.as_deref().ok_or_else(|| {
            ConnectError::Config("SQL_SERVER_NAME is not configured".to_string())
        })?;
        let database = self.database.as_deref().ok_or_else(|| {
            ConnectError::Config("SQL_DATABASE_NAME is not configured".to_string())
        })?;
        self.open_authenticated_connection(server, database).await
    }

    /// Open a connection to `database` on `server` using the service identity.
    ///
    /// # Errors
    ///
    /// - `ConnectError::Config` - unsafe or empty server/database
    /// - `ConnectError::Credential` - no access token could be obtained
    /// - `ConnectError::Encoding` - the token could not be encoded
    /// - `ConnectError::Driver` - the driver failed; message is scrubbed
    #[instrument(skip_all, fields(server = %server, database = %database, driver = self.driver.name()))]
    pub async fn open_authenticated_connection(
        &self,
        server: &str,
        database: &str,
    ) -> Result<Box<dyn DbConnection>, ConnectError> {
        let start = Instant::now();
        let result = self.open(server, database).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        record_db_connection(status, start.elapsed());

        result
    }

    async fn open(&self, server: &str, database: &str) -> Result<Box<dyn DbConnection>, ConnectError> {
        let connection_string = connection_string::build(&self.odbc_driver, server, database)
            .map_err(|e| ConnectError::Config(e.to_string()))?;

        let token = self.broker.get_access_token(DATABASE_SCOPE).await?;
        let raw_token = token.token().expose_secret();

        let blob = AccessTokenBlob::encode(raw_token)?;
        let request =
            ConnectionRequest::new(connection_string).with_attribute(SQL_COPT_SS_ACCESS_TOKEN, blob);

        match self.driver.connect(request).await {
            Ok(connection) => {
                tracing::info!(target: "api.db", "Database connection opened");
                Ok(connection)
            }
            Err(e) => {
                let message = scrub(&e.to_string(), raw_token);
                tracing::error!(target: "api.db", error = %message, "Database connection failed");
                Err(ConnectError::Driver(message))
            }
        }
    }
}

impl std::fmt::Debug for ConnectionOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOpener")
            .field("driver", &self.driver.name())
            .field("odbc_driver", &self.odbc_driver)
            .field("server", &self.server)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}
