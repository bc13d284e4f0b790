//! Database connectivity probe.

use crate::auth::Principal;
use crate::errors::ApiError;
use crate::routes::AppState;
use axum::{extract::State, Extension, Json};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Single read used to prove the connection works.
pub const PROBE_QUERY: &str = "SELECT TOP 1 SkuSelected FROM SelectionHistory";

/// Returned in `data` when the probe query yields no rows.
pub const NO_DATA: &str = "No data";

#[derive(Debug, Serialize)]
pub struct TestDbResponse {
    pub message: String,
    pub data: Value,
}

/// Handler for GET /api/test-db
///
/// Opens one authenticated connection, runs [`PROBE_QUERY`], closes the
/// connection and reports the first value.
///
/// # Errors
///
/// - 500 if the database target is not configured
/// - 500 with a generic message if the token, connection or query fails
#[instrument(skip_all, name = "api.test_db")]
pub async fn test_db(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<TestDbResponse>, ApiError> {
    let mut connection = state.opener.open_configured().await?;

    let result = connection.query_first_value(PROBE_QUERY).await;

    // Close regardless of the query outcome; a failed close is not the caller's problem.
    if let Err(e) = connection.close().await {
        tracing::warn!(target: "api.db", error = %e, "Failed to close database connection");
    }

    let data = result?.unwrap_or_else(|| Value::String(NO_DATA.to_string()));

    Ok(Json(TestDbResponse {
        message: format!("DB connected successfully as {}", principal.display_name()),
        data,
    }))
}
