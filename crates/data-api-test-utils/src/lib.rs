//! # Data API Test Utilities
//!
//! Shared test utilities for the Data API.
//!
//! This crate provides:
//! - Deterministic RSA fixtures (fixed keys and their JWKs)
//! - A signed test token builder
//! - A mock key-set endpoint (wiremock)
//! - A recording native driver and a static credential source
//! - A server harness that serves the real router
//!
//! ## Usage
//!
//! ```rust,ignore
//! use data_api_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let keypair = TestKeypair::primary("key-1");
//!     let jwks = MockJwksServer::start(&[&keypair]).await;
//!     let server = TestDataApiServer::builder(jwks.jwks_url()).spawn().await?;
//!
//!     let token = TestTokenBuilder::new().sign(&keypair);
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/api/upload", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod credentials;
pub mod crypto_fixtures;
pub mod mock_driver;
pub mod mock_jwks;
pub mod server_harness;
pub mod token_builders;

pub use credentials::*;
pub use crypto_fixtures::*;
pub use mock_driver::*;
pub use mock_jwks::*;
pub use server_harness::*;
pub use token_builders::*;
