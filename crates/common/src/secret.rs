//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for every bearer credential the service handles: inbound access tokens
//! while in flight, database access tokens, OAuth client secrets, managed
//! identity headers and the binary connection attribute blob.
//!
//! # Compile-Time Safety
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct that derives `Debug` over a secret gets safe logging behavior.
//!
//! # Memory Safety
//!
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct DatabaseLogin {
//!     server: String,
//!     access_token: SecretString,
//! }
//!
//! let login = DatabaseLogin {
//!     server: "sql.example.net".to_string(),
//!     access_token: SecretString::from("eyJ0eXAi..."),
//! };
//!
//! // Safe: the token is redacted
//! let debug = format!("{login:?}");
//! assert!(!debug.contains("eyJ0eXAi"));
//!
//! // Reading the value is explicit
//! let _raw: &str = login.access_token.expose_secret();
//! ```
//!
//! Use `SecretBox<Vec<u8>>` for binary secrets such as the UTF-16LE access
//! token blob handed to the database driver.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
