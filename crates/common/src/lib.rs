//! Common utilities and types shared across the Data API crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (header extraction, expiry peek, iat checks)
pub mod jwt;

/// Module for ambient credential sources (service principal, managed identity, CLI)
pub mod credential;
