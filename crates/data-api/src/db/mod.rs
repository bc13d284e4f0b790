//! Database access with the service's own identity.
//!
//! - `attribute_blob` - access token encoding for the driver handshake
//! - `connection_string` - ODBC-style connection string build/parse
//! - `driver` - the native driver seam
//! - `tds` - TDS implementation of the driver seam
//! - `opener` - opens one authenticated connection per call

pub mod attribute_blob;
pub mod connection_string;
pub mod driver;
pub mod opener;
pub mod tds;

pub use attribute_blob::{AccessTokenBlob, BlobError, SQL_COPT_SS_ACCESS_TOKEN};
pub use driver::{ConnectionRequest, DbConnection, DriverError, NativeDriver};
pub use opener::ConnectionOpener;
pub use tds::TdsDriver;

use common::credential::CredentialError;
use thiserror::Error;

/// Why an authenticated connection could not be opened.
///
/// Messages never contain the access token.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Database connection is not configured: {0}")]
    Config(String),

    #[error("Database access token unavailable: {0}")]
    Credential(#[from] CredentialError),

    #[error("Access token could not be encoded: {0}")]
    Encoding(#[from] BlobError),

    #[error("Database connection failed: {0}")]
    Driver(String),
}

impl ConnectError {
    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::Config(_) => "config_error",
            ConnectError::Credential(_) => "credential_error",
            ConnectError::Encoding(_) => "encoding_error",
            ConnectError::Driver(_) => "driver_error",
        }
    }
}
