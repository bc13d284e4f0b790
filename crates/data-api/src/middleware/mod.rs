//! Middleware for the Data API.
//!
//! - `auth` - bearer token authentication for protected routes
//! - `http_metrics` - HTTP request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthState, PrincipalExt};
pub use http_metrics::http_metrics_middleware;
