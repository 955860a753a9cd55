//! API Routes
//!
//! Configures the Axum router with every admin endpoint.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    health_handler, invalidate_entity_handler, invalidate_namespace_handler, memory_handler,
    no_expiry_handler, preload_handler, reset_metrics_handler, retention_handler, stats_handler,
    usage_handler, AppState,
};

/// Creates the admin router.
///
/// # Endpoints
/// - `GET /health` - Liveness plus store reachability
/// - `GET /stats` - Metrics snapshot and store INFO
/// - `GET /memory` - Latest sample, pressure level, trend and TTL factor
/// - `GET /keys/no-expiry` - Keys without a TTL
/// - `GET /usage` - Key count and bytes per pattern
/// - `POST /metrics/reset` - Zero the counters
/// - `DELETE /namespaces/:name` - Drop a whole namespace
/// - `DELETE /entities/:entity_type/:id` - Entity invalidation
/// - `POST /retention` - Run retention now
/// - `POST /preload` - Warm the cache now
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/memory", get(memory_handler))
        .route("/keys/no-expiry", get(no_expiry_handler))
        .route("/usage", get(usage_handler))
        .route("/metrics/reset", post(reset_metrics_handler))
        .route("/namespaces/:name", delete(invalidate_namespace_handler))
        .route("/entities/:entity_type/:id", delete(invalidate_entity_handler))
        .route("/retention", post(retention_handler))
        .route("/preload", post(preload_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Engine;
    use crate::kv::MemoryStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let engine = Engine::with_memory_store(Config::default(), Arc::new(MemoryStore::new()));
        create_router(AppState::new(Arc::new(engine)))
    }

    async fn status_of(method: &str, uri: &str) -> StatusCode {
        create_test_app()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of("GET", "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of("GET", "/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_memory_endpoint() {
        assert_eq!(status_of("GET", "/memory").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_bad_request() {
        assert_eq!(
            status_of("DELETE", "/namespaces/billing").await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_not_found() {
        assert_eq!(
            status_of("DELETE", "/entities/invoice/1").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_wrong_method() {
        assert_eq!(
            status_of("GET", "/retention").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
