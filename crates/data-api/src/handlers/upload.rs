//! Upload placeholder.

use crate::auth::Principal;
use axum::{Extension, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
}

/// Handler for POST /api/upload
///
/// Accepts nothing yet; confirms who would have uploaded.
#[tracing::instrument(skip_all, name = "api.upload")]
pub async fn upload(Extension(principal): Extension<Principal>) -> Json<UploadResponse> {
    Json(UploadResponse {
        message: format!("File uploaded successfully by {}", principal.display_name()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_message_names_caller() {
        let principal = Principal::new(None, Some("ada@example.com".to_string()));
        let Json(body) = upload(Extension(principal)).await;
        assert_eq!(body.message, "File uploaded successfully by ada@example.com");
    }

    #[tokio::test]
    async fn test_upload_without_email() {
        let principal = Principal::new(Some("svc".to_string()), None);
        let Json(body) = upload(Extension(principal)).await;
        assert_eq!(body.message, "File uploaded successfully by unknown user");
    }
}
