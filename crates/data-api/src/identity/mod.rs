//! Service identity.
//!
//! The broker exchanges the process's ambient identity for resource-scoped
//! access tokens. Credential sources live in `common::credential`.

pub mod broker;

pub use broker::{TokenBroker, DATABASE_SCOPE};
