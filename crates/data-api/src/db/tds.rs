//! TDS driver.
//!
//! Implements [`NativeDriver`] with the `tiberius` TDS client. The access
//! token is read back out of attribute 1256 and presented as a federated
//! authentication token during login. Encryption is required with
//! certificate validation unless the connection string says otherwise.

use crate::db::connection_string::{self, ConnectionParams};
use crate::db::driver::{ConnectionRequest, DbConnection, DriverError, NativeDriver};
use async_trait::async_trait;
use common::secret::ExposeSecret;
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config as TdsConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::instrument;

const APPLICATION_NAME: &str = "data-api";

type TdsClient = Client<Compat<TcpStream>>;

/// Native driver speaking TDS over TCP.
#[derive(Debug, Default, Clone)]
pub struct TdsDriver;

impl TdsDriver {
    pub fn new() -> Self {
        Self
    }
}

fn tds_config(params: &ConnectionParams, token: &str) -> TdsConfig {
    let mut config = TdsConfig::new();
    config.host(&params.host);
    config.port(params.port);
    if let Some(database) = &params.database {
        config.database(database);
    }
    config.application_name(APPLICATION_NAME);
    config.authentication(AuthMethod::aad_token(token));
    config.encryption(if params.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if params.trust_server_certificate {
        config.trust_cert();
    }
    config
}

async fn connect_tcp(config: TdsConfig) -> Result<TdsClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

async fn login(params: &ConnectionParams, token: &str) -> Result<TdsClient, DriverError> {
    let config = tds_config(params, token);

    match connect_tcp(config).await {
        Ok(client) => Ok(client),
        // Gateways may redirect the login to the node hosting the database
        Err(tiberius::error::Error::Routing { host, port }) => {
            tracing::debug!(target: "api.db", host = %host, port, "Following TDS routing redirect");
            let redirected = ConnectionParams {
                host,
                port,
                ..params.clone()
            };
            connect_tcp(tds_config(&redirected, token))
                .await
                .map_err(map_tiberius_error)
        }
        Err(e) => Err(map_tiberius_error(e)),
    }
}

fn map_tiberius_error(error: tiberius::error::Error) -> DriverError {
    match error {
        tiberius::error::Error::Io { kind, message } => {
            DriverError::Io(format!("{kind:?}: {message}"))
        }
        other => DriverError::Database(other.to_string()),
    }
}

#[async_trait]
impl NativeDriver for TdsDriver {
    fn name(&self) -> &'static str {
        "tds"
    }

    #[instrument(skip_all)]
    async fn connect(&self, request: ConnectionRequest) -> Result<Box<dyn DbConnection>, DriverError> {
        let params = connection_string::parse(request.connection_string())?;
        let token = request
            .access_token()
            .ok_or(DriverError::MissingAccessToken)?
            .decode()?;

        tracing::debug!(
            target: "api.db",
            host = %params.host,
            port = params.port,
            encrypt = params.encrypt,
            "Opening TDS connection"
        );

        let client = tokio::time::timeout(
            params.connect_timeout,
            login(&params, token.expose_secret()),
        )
        .await
        .map_err(|_| DriverError::Timeout(params.connect_timeout))??;

        Ok(Box::new(TdsConnection { client }))
    }
}

/// An open TDS session.
pub struct TdsConnection {
    client: TdsClient,
}

impl std::fmt::Debug for TdsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdsConnection").finish_non_exhaustive()
    }
}

/// Convert a column value to JSON. NULL becomes `Value::Null`.
fn column_to_json(column: ColumnData<'static>) -> Result<Value, DriverError> {
    let value = match column {
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())),
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(|f| Value::from(f64::from(f))),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| Value::String(n.to_string())),
        _ => {
            return Err(DriverError::Database(
                "unsupported column type in probe query".to_string(),
            ))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[async_trait]
impl DbConnection for TdsConnection {
    async fn query_first_value(&mut self, sql: &str) -> Result<Option<Value>, DriverError> {
        let stream = self
            .client
            .simple_query(sql)
            .await
            .map_err(map_tiberius_error)?;
        let row = stream.into_row().await.map_err(map_tiberius_error)?;

        match row.and_then(|row| row.into_iter().next()) {
            Some(column) => column_to_json(column).map(Some),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.client.close().await.map_err(map_tiberius_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::attribute_blob::{AccessTokenBlob, SQL_COPT_SS_ACCESS_TOKEN};
    use std::borrow::Cow;
    use std::time::Duration;

    #[test]
    fn test_column_to_json() {
        assert_eq!(
            column_to_json(ColumnData::String(Some(Cow::Owned("SKU-1".to_string())))).unwrap(),
            Value::String("SKU-1".to_string())
        );
        assert_eq!(column_to_json(ColumnData::I32(Some(7))).unwrap(), Value::from(7));
        assert_eq!(column_to_json(ColumnData::String(None)).unwrap(), Value::Null);
        assert_eq!(column_to_json(ColumnData::Bit(Some(true))).unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_missing_access_token_attribute() {
        let request = ConnectionRequest::new("SERVER=127.0.0.1,9;DATABASE=db".to_string());
        let err = TdsDriver::new().connect(request).await.err().unwrap();
        assert!(matches!(err, DriverError::MissingAccessToken));
    }

    #[tokio::test]
    async fn test_malformed_connection_string() {
        let request = ConnectionRequest::new("DATABASE=db".to_string()).with_attribute(
            SQL_COPT_SS_ACCESS_TOKEN,
            AccessTokenBlob::encode("t").unwrap(),
        );
        let err = TdsDriver::new().connect(request).await.err().unwrap();
        assert!(matches!(err, DriverError::ConnectionString(_)));
    }

    #[tokio::test]
    async fn test_malformed_access_token_attribute() {
        let request = ConnectionRequest::new("SERVER=127.0.0.1,9".to_string()).with_attribute(
            SQL_COPT_SS_ACCESS_TOKEN,
            AccessTokenBlob::from_bytes(vec![0x09, 0x00, 0x00, 0x00, 0x61]),
        );
        let err = TdsDriver::new().connect(request).await.err().unwrap();
        assert!(matches!(err, DriverError::AccessToken(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_reported() {
        let request = ConnectionRequest::new(
            "SERVER=127.0.0.1,9;DATABASE=db;Connection Timeout=5".to_string(),
        )
        .with_attribute(SQL_COPT_SS_ACCESS_TOKEN, AccessTokenBlob::encode("t").unwrap());

        let err = TdsDriver::new().connect(request).await.err().unwrap();
        assert!(matches!(
            err,
            DriverError::Io(_) | DriverError::Timeout(_) | DriverError::Database(_)
        ));
    }

    #[test]
    fn test_tds_config_address() {
        let params = ConnectionParams {
            driver: None,
            host: "db.example.test".to_string(),
            port: 14330,
            database: Some("inventory".to_string()),
            encrypt: true,
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(30),
        };
        let config = tds_config(&params, "token");
        assert_eq!(config.get_addr(), "db.example.test:14330");
    }
}
