//! HTTP request handlers.

pub mod health;
pub mod metrics;
pub mod test_db;
pub mod upload;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use test_db::test_db;
pub use upload::upload;
