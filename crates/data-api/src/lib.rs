//! Data API Service Library
//!
//! This library provides the core functionality for the Data API - a small
//! HTTP API in front of a managed SQL database whose interesting part is the
//! authentication boundary:
//!
//! - Validating inbound bearer tokens against a remote JWKS endpoint
//! - Exchanging the service's ambient identity for a database access token
//!   that is injected into the native connection handshake
//!
//! # Architecture
//!
//! Two independent chains, joined only by the request handlers:
//!
//! ```text
//! auth::jwks::KeySetCache -> auth::jwt::TokenValidator -> middleware::auth
//! identity::TokenBroker -> db::opener::ConnectionOpener -> db::driver::NativeDriver
//! ```
//!
//! # Modules
//!
//! - `auth` - JWKS cache, token validation, authenticated principal
//! - `config` - Service configuration from environment
//! - `db` - Access token blob codec, connection string, connection opener, TDS driver
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `identity` - Database access token broker
//! - `middleware` - Bearer auth and HTTP metrics middleware
//! - `observability` - Prometheus metrics and tracing setup
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod observability;
pub mod routes;
