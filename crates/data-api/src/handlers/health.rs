//! Liveness probe.
//!
//! Does not touch the key set or the database: failure means the process
//! is hung, not that a dependency is down.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Handler for GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
