//! HTTP routes for the Data API.
//!
//! Defines the Axum router and application state.

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::db::ConnectionOpener;
use crate::errors::ApiError;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use axum::{
    error_handling::HandleErrorLayer,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    BoxError, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Bearer token validator backed by the process-wide key set cache.
    pub validator: Arc<TokenValidator>,

    /// Opens authenticated database connections.
    pub opener: Arc<ConnectionOpener>,
}

/// CORS layer for the configured origin allow-list.
///
/// Credentials are allowed, so origins are listed explicitly; methods and
/// headers are mirrored from the preflight request.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(target: "api.routes", origin = %origin, "Ignoring unusable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/health` - Liveness probe - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/test-db` - Database probe - requires authentication
/// - `/api/upload` - Upload placeholder - requires authentication
/// - CORS allow-list, TraceLayer, configured request timeout (504 when elapsed)
/// - HTTP metrics middleware
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        validator: state.validator.clone(),
    });
    let cors = cors_layer(&state.config.cors_allowed_origins);
    let request_timeout = state.config.request_timeout;

    let public_routes = Router::new().route("/api/health", get(handlers::health_check));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/test-db", get(handlers::test_db))
        .route("/api/upload", post(handlers::upload))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. CorsLayer - Answer preflights before auth runs
    // 4. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                    middleware_error(err, request_timeout)
                }))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// Map an error raised by the timeout layer onto the API error body.
fn middleware_error(err: BoxError, limit: Duration) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::Timeout(limit)
    } else {
        tracing::error!(target: "api.routes", error = %err, "Unhandled middleware error");
        ApiError::Internal
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{KeySetCache, ValidatorSettings};
    use crate::db::{ConnectionRequest, DbConnection, DriverError, NativeDriver};
    use crate::identity::TokenBroker;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use common::credential::{AccessToken, CredentialError, CredentialSource};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct NoCredential;

    #[async_trait]
    impl CredentialSource for NoCredential {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken, CredentialError> {
            Err(CredentialError::NotConfigured("no identity in tests".to_string()))
        }
    }

    struct RefusingDriver;

    #[async_trait]
    impl NativeDriver for RefusingDriver {
        fn name(&self) -> &'static str {
            "refusing"
        }

        async fn connect(
            &self,
            _request: ConnectionRequest,
        ) -> Result<Box<dyn DbConnection>, DriverError> {
            Err(DriverError::Io("refused".to_string()))
        }
    }

    fn test_router() -> Router {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let validator = Arc::new(TokenValidator::new(
            Arc::new(KeySetCache::new(None)),
            ValidatorSettings::default(),
        ));
        let broker = Arc::new(TokenBroker::new(Arc::new(NoCredential)));
        let opener = Arc::new(ConnectionOpener::from_config(
            broker,
            Arc::new(RefusingDriver),
            &config,
        ));
        let state = Arc::new(AppState {
            config,
            validator,
            opener,
        });
        // build_recorder() does not install a global recorder
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(state, handle)
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        for (method, uri) in [(Method::GET, "/api/test-db"), (Method::POST, "/api/upload")] {
            let response = test_router()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint_is_public() {
        let response = test_router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_listed_origin() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/test-db")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "GET");
    }

    #[tokio::test]
    async fn test_cors_rejects_unlisted_origin() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header(header::ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn test_elapsed_maps_to_timeout() {
        let limit = Duration::from_secs(90);
        let err = middleware_error(Box::new(tower::timeout::error::Elapsed::new()), limit);
        assert!(matches!(err, ApiError::Timeout(d) if d == limit));
        assert_eq!(err.status_code(), 504);

        let other = middleware_error("overloaded".into(), limit);
        assert!(matches!(other, ApiError::Internal));
    }

    #[test]
    fn test_cors_layer_skips_unusable_origin() {
        // Builds without panicking even with a value that is not a header
        let _layer = cors_layer(&[
            "http://localhost:3000".to_string(),
            "bad\norigin".to_string(),
        ]);
    }
}
