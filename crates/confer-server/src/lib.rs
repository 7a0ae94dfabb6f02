//! Confer server: HTTP and WebSocket surface of the relationship core.
//!
//! Routes under `/api` and `/events` require `Authorization: Bearer`.
//! `/ws` authenticates during the handshake and accepts the credential as
//! a bearer header or a `token` query parameter.

pub mod api_messages;
pub mod api_relationships;
pub mod api_sse;
pub mod api_ws;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frames;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod session;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use confer_db::DbPool;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::MessagingConfig;
use crate::dispatch::Dispatcher;
use crate::error::ApiError;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::session::SessionVerifier;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Session credential verifier.
    pub verifier: Arc<dyn SessionVerifier>,
    /// Open WebSocket connections by user.
    pub registry: ConnectionRegistry,
    /// Direct message router.
    pub router: MessageRouter,
    /// Relationship event dispatcher.
    pub dispatcher: Dispatcher,
    /// Messaging settings.
    pub messaging: MessagingConfig,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        verifier: Arc<dyn SessionVerifier>,
        messaging: MessagingConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        Self {
            router: MessageRouter::new(pool.clone(), registry.clone(), messaging.clone()),
            dispatcher: Dispatcher::new(registry.clone()),
            pool,
            verifier,
            registry,
            messaging,
        }
    }
}

/// Runs `f` with a pooled connection on the blocking thread pool.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ApiError::Internal(format!("db connection failed: {}", e)))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("task join error: {}", e)))?
}

/// Maximum request body size (256 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/api/resources/{resourceId}",
            put(api_relationships::put_resource_handler),
        )
        .route(
            "/api/resources/{resourceId}/collaborators",
            post(api_relationships::join_collaboration_handler)
                .get(api_relationships::list_collaborators_handler),
        )
        .route(
            "/api/resources/{resourceId}/reviews",
            post(api_relationships::request_review_handler),
        )
        .route(
            "/api/friends/{userId}",
            post(api_relationships::request_friendship_handler),
        )
        .route(
            "/api/friends/{userId}/status",
            get(api_relationships::friend_status_handler),
        )
        .route(
            "/api/relationships",
            get(api_relationships::list_relationships_handler),
        )
        .route(
            "/api/relationships/{edgeId}",
            get(api_relationships::get_relationship_handler)
                .delete(api_relationships::revoke_handler),
        )
        .route(
            "/api/relationships/{edgeId}/respond",
            post(api_relationships::respond_handler),
        )
        .route(
            "/api/relationships/{edgeId}/acknowledge",
            post(api_relationships::acknowledge_handler),
        )
        .route(
            "/api/messages/{userId}",
            get(api_messages::get_conversation_handler),
        )
        .route(
            "/events/relationships",
            get(api_sse::relationship_events_handler),
        )
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
