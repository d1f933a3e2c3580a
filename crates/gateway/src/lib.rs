//! DocHarbor API Gateway
//!
//! The entry point for all external API requests. Handles:
//! - Upload credential issuance (presigned PUT URLs)
//! - Document listing, status, and deletion
//! - Query orchestration against the knowledge engine
//! - Authentication, rate limiting, and observability

pub mod handlers;
pub mod middleware;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{delete, get, post},
    Router,
};
use docharbor_common::{
    auth::{extract_bearer, request_id_or_new, JwtManager},
    cache::Cache,
    config::AppConfig,
    db::DocumentStore,
    engine::KnowledgeEngine,
    errors::{AppError, Result},
    storage::ObjectStore,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub engine: Arc<dyn KnowledgeEngine>,
    pub jwt: Arc<JwtManager>,
    pub cache: Option<Arc<Cache>>,
}

/// Authenticated caller context, extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Subject claim of the validated token
    pub subject: String,

    /// Scopes carried by the token
    pub scopes: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let request_id = request_id_or_new(
            parts
                .headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok()),
        );

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header is not a bearer token".to_string(),
        })?;

        let claims = state.jwt.validate_token(token)?;

        Ok(AuthContext {
            subject: claims.sub,
            scopes: claims.scopes,
            request_id,
        })
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Upload orchestration
        .route("/upload", post(handlers::upload::request_upload))
        // Document tracking
        .route("/documents", get(handlers::documents::list_documents))
        .route(
            "/documents/{id}/status",
            get(handlers::documents::get_document_status),
        )
        .route("/documents/{id}", delete(handlers::documents::delete_document))
        // Query orchestration
        .route("/query", post(handlers::query::query))
        .route("/query/status", get(handlers::query::knowledge_base_status));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::RequestLimiter::new(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        api_routes = api_routes.layer(axum::middleware::from_fn(move |request, next| {
            let limiter = limiter.clone();
            async move { middleware::rate_limit::rate_limit(request, next, limiter).await }
        }));
    }

    // Compose the app
    Router::new()
        .merge(api_routes)
        .layer(axum::middleware::from_fn(middleware::telemetry::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
