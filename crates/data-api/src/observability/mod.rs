//! Observability for the Data API.
//!
//! Provides metrics definitions and tracing subscriber setup.

pub mod metrics;
pub mod tracing_init;
