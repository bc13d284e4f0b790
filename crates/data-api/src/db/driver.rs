//! Native driver seam.
//!
//! The opener hands a [`ConnectionRequest`] (connection string plus
//! pre-connect attributes) to a [`NativeDriver`]. Production uses
//! [`crate::db::tds::TdsDriver`]; tests substitute a recording driver.

use crate::db::attribute_blob::{AccessTokenBlob, BlobError, SQL_COPT_SS_ACCESS_TOKEN};
use crate::db::connection_string::ConnectionStringError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a driver. Messages may echo server text, so the opener
/// scrubs them before they leave the db module.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("access token attribute 1256 (SQL_COPT_SS_ACCESS_TOKEN) is missing")]
    MissingAccessToken,

    #[error("access token attribute is malformed: {0}")]
    AccessToken(#[from] BlobError),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Everything a driver needs to open one connection.
#[derive(Debug)]
pub struct ConnectionRequest {
    connection_string: String,
    attributes: BTreeMap<i32, AccessTokenBlob>,
}

impl ConnectionRequest {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a pre-connect attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: i32, value: AccessTokenBlob) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn attribute(&self, key: i32) -> Option<&AccessTokenBlob> {
        self.attributes.get(&key)
    }

    /// The `SQL_COPT_SS_ACCESS_TOKEN` attribute.
    pub fn access_token(&self) -> Option<&AccessTokenBlob> {
        self.attribute(SQL_COPT_SS_ACCESS_TOKEN)
    }

    /// Attribute ids present, in ascending order.
    pub fn attribute_keys(&self) -> Vec<i32> {
        self.attributes.keys().copied().collect()
    }
}

/// An open database connection owned by the caller. No pooling: close it
/// explicitly when done.
#[async_trait]
pub trait DbConnection: Send {
    /// Run `sql` and return the first column of the first row.
    ///
    /// `Ok(None)` means the query produced no rows; a SQL NULL is
    /// `Some(Value::Null)`.
    async fn query_first_value(
        &mut self,
        sql: &str,
    ) -> Result<Option<serde_json::Value>, DriverError>;

    /// Close the connection.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Opens connections from a [`ConnectionRequest`].
#[async_trait]
pub trait NativeDriver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn connect(&self, request: ConnectionRequest) -> Result<Box<dyn DbConnection>, DriverError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_access_token_attribute() {
        let blob = AccessTokenBlob::encode("token").unwrap();
        let request = ConnectionRequest::new("SERVER=h".to_string())
            .with_attribute(SQL_COPT_SS_ACCESS_TOKEN, blob);

        assert_eq!(request.attribute_keys(), vec![1256]);
        assert_eq!(request.connection_string(), "SERVER=h");
        assert!(request.access_token().is_some());
    }

    #[test]
    fn test_request_debug_redacts_token() {
        let blob = AccessTokenBlob::encode("very-secret-token").unwrap();
        let request = ConnectionRequest::new("SERVER=h".to_string())
            .with_attribute(SQL_COPT_SS_ACCESS_TOKEN, blob);

        let debug_str = format!("{request:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("very-secret-token"));
    }

    #[test]
    fn test_missing_token_message_names_attribute() {
        assert!(DriverError::MissingAccessToken.to_string().contains("1256"));
    }
}
