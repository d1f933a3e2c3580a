//! DocHarbor API Gateway binary

use docharbor_gateway::{create_router, AppState};

use docharbor_common::{
    auth::JwtManager,
    cache::{Cache, CacheConfig},
    config::AppConfig,
    db::{DbPool, Repository},
    engine::HttpKnowledgeEngine,
    metrics,
    storage::S3ObjectStore,
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .json()
        .init();

    info!("Starting DocHarbor API Gateway v{}", VERSION);

    // Load configuration; missing identifiers abort startup
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(Repository::new(db));

    // Object store client
    let objects = Arc::new(S3ObjectStore::new(config.storage.bucket.clone()).await);

    // Knowledge engine client
    let engine = Arc::new(HttpKnowledgeEngine::new(config.engine.clone())?);

    // Bearer token validation
    let jwt = Arc::new(JwtManager::new(
        &config.auth.jwt_secret,
        config.auth.jwt_expiration_secs,
    ));

    // Optional Redis cache
    let cache = match config.redis.url {
        Some(ref url) => match Cache::new(CacheConfig {
            url: url.clone(),
            default_ttl_secs: config.redis.default_ttl_secs,
            ..Default::default()
        })
        .await
        {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, continuing without cache");
                None
            }
        },
        None => None,
    };

    // Create app state
    let state = AppState {
        config: config.clone(),
        store,
        objects,
        engine,
        jwt,
        cache,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
