//! Data API
//!
//! Entry point: validates inbound bearer tokens and opens database
//! connections with the service's own identity.

use common::credential::DefaultCredentialChain;
use data_api::auth::{KeySetCache, TokenValidator, ValidatorSettings};
use data_api::config::Config;
use data_api::db::connection_string::CONNECTION_TIMEOUT_SECONDS;
use data_api::db::{ConnectionOpener, TdsDriver};
use data_api::identity::TokenBroker;
use data_api::observability::metrics::init_metrics_recorder;
use data_api::observability::tracing_init::{init_tracing, LogFormat};
use data_api::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env())?;

    info!("Starting Data API");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        jwks_configured = config.jwks_url.is_some(),
        issuer_configured = config.issuer.is_some(),
        audience_configured = config.audience.is_some(),
        sql_server = config.sql_server_name.as_deref().unwrap_or("<unset>"),
        db_token_cache = config.db_token_cache_enabled,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Configuration loaded successfully"
    );
    if config.request_timeout.as_secs() <= CONNECTION_TIMEOUT_SECONDS {
        warn!(
            request_timeout_secs = config.request_timeout.as_secs(),
            connection_timeout_secs = CONNECTION_TIMEOUT_SECONDS,
            "Request timeout does not exceed the connection timeout; slow connects will surface as 504"
        );
    }
    if config.jwks_url.is_none() {
        warn!("AUTH_SERVER_JWKS_URL is not set; protected routes will fail until it is");
    }

    // Metrics recorder before any metric is recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // One key set cache per process
    let key_set = Arc::new(
        KeySetCache::new(config.jwks_url.clone())
            .with_ttl(config.jwks_cache_ttl)
            .with_refresh_cooldown(config.jwks_refresh_cooldown),
    );
    let validator = Arc::new(TokenValidator::new(
        key_set,
        ValidatorSettings::from_config(&config),
    ));

    let credential = DefaultCredentialChain::from_env().map_err(|e| {
        error!("Failed to configure service identity: {}", e);
        e
    })?;
    info!(sources = ?credential.source_names(), "Service identity chain configured");

    let broker = Arc::new(TokenBroker::from_config(Arc::new(credential), &config));
    let opener = Arc::new(ConnectionOpener::from_config(
        broker,
        Arc::new(TdsDriver::new()),
        &config,
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState {
        config,
        validator,
        opener,
    });
    let app = routes::build_routes(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Data API listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_seconds))
    .await?;

    info!("Data API shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (API_DRAIN_SECONDS=0)");
    }
}
