//! API Handlers
//!
//! Admin endpoints over a running [`Engine`]. Cache-layer failures surface
//! here as JSON errors; they never reach wrapped business endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use crate::engine::Engine;
use crate::error::{CacheError, Result};
use crate::maintenance::{JsonFileSource, PreloadReport};
use crate::models::{
    HealthResponse, InvalidateEntityQuery, InvalidationResponse, MemoryResponse, NoExpiryQuery,
    PreloadRequest, ResetResponse, RetentionResponse, StatsResponse, UsageQuery,
};
use crate::pressure::{keys_without_expiry, pattern_usage, PatternUsage};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.engine.kv.ping().await.is_ok();
    Json(HealthResponse::new(reachable))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let store = state.engine.kv.info().await.ok();
    Json(StatsResponse {
        metrics: state.engine.cache.metrics().snapshot(),
        store,
    })
}

/// Handler for GET /memory
///
/// Reports the latest sample without taking a new one.
pub async fn memory_handler(State(state): State<AppState>) -> Json<MemoryResponse> {
    Json(state.engine.memory_report())
}

/// Handler for POST /metrics/reset
pub async fn reset_metrics_handler(State(state): State<AppState>) -> Json<ResetResponse> {
    let metrics = state.engine.cache.metrics();
    metrics.reset();
    info!("metrics reset");
    Json(ResetResponse::new(metrics.snapshot().last_reset))
}

/// Handler for DELETE /namespaces/:name
pub async fn invalidate_namespace_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<InvalidationResponse>> {
    // unknown names are a client error here, not a silent no-op
    state.engine.cache.namespaces().get(&name)?;
    let deleted = state.engine.mapper.invalidate_namespace(&name).await;
    Ok(Json(InvalidationResponse::new(name, deleted)))
}

/// Handler for DELETE /entities/:entity_type/:id
pub async fn invalidate_entity_handler(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
    Query(query): Query<InvalidateEntityQuery>,
) -> Result<Json<InvalidationResponse>> {
    if state.engine.mapper.rule(&entity_type).is_none() {
        return Err(CacheError::NotFound(format!(
            "no invalidation rule for '{}'",
            entity_type
        )));
    }
    let deleted = state
        .engine
        .mapper
        .invalidate_entity(&entity_type, &id, query.include_related())
        .await;
    Ok(Json(InvalidationResponse::new(
        format!("{}:{}", entity_type, id),
        deleted,
    )))
}

/// Handler for POST /retention
pub async fn retention_handler(State(state): State<AppState>) -> Json<RetentionResponse> {
    Json(RetentionResponse::new(state.engine.retention.enforce().await))
}

/// Handler for POST /preload
pub async fn preload_handler(
    State(state): State<AppState>,
    body: Option<Json<PreloadRequest>>,
) -> Result<Json<PreloadReport>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    let source = match req.source {
        Some(path) => JsonFileSource::new(path),
        None => state.engine.preload_source().ok_or_else(|| {
            CacheError::InvalidRequest("no preload source configured".to_string())
        })?,
    };
    Ok(Json(state.engine.preloader.preload(&source).await))
}

/// Handler for GET /keys/no-expiry
pub async fn no_expiry_handler(
    State(state): State<AppState>,
    Query(query): Query<NoExpiryQuery>,
) -> Result<Json<Vec<String>>> {
    let engine = &state.engine;
    let keys =
        keys_without_expiry(engine.kv.as_ref(), query.limit(), engine.cache.scan_batch()).await?;
    Ok(Json(keys))
}

/// Handler for GET /usage
pub async fn usage_handler(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Vec<PatternUsage>>> {
    let engine = &state.engine;
    let mut patterns = query.pattern_list();
    if patterns.is_empty() {
        patterns = engine.default_usage_patterns();
    }
    let usage = pattern_usage(engine.kv.as_ref(), &patterns, engine.cache.scan_batch()).await?;
    Ok(Json(usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kv::{KvStore, MemoryStore};
    use crate::pressure::{MemorySample, PressureLevel};
    use serde_json::json;

    fn state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::with_memory_store(Config::default(), store.clone());
        (AppState::new(Arc::new(engine)), store)
    }

    #[tokio::test]
    async fn test_health_handler() {
        let (state, store) = state();
        assert_eq!(health_handler(State(state.clone())).await.status, "healthy");

        store.set_available(false);
        let response = health_handler(State(state)).await;
        assert!(!response.store);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let (state, _) = state();
        let key = state.engine.cache.bare_key("user", "1").unwrap();
        state.engine.cache.set(key.as_str(), &json!(1), None).await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.metrics.sets, 1);
        assert_eq!(response.store.as_ref().unwrap().total_keys, 1);
    }

    #[tokio::test]
    async fn test_memory_handler_reports_level() {
        let (state, _) = state();
        state.engine.monitor.record(MemorySample::bounded(90.0));

        let response = memory_handler(State(state)).await;
        assert_eq!(response.level, PressureLevel::High);
        assert_eq!(response.ttl_factor, 0.5);
        assert_eq!(response.samples, 1);
    }

    #[tokio::test]
    async fn test_reset_metrics_handler() {
        let (state, _) = state();
        state.engine.cache.get::<serde_json::Value>("cache:user:9").await;
        assert_eq!(state.engine.cache.metrics().snapshot().misses, 1);

        reset_metrics_handler(State(state.clone())).await;
        assert_eq!(state.engine.cache.metrics().snapshot().misses, 0);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_namespace() {
        let (state, _) = state();
        let result = invalidate_namespace_handler(State(state), Path("billing".to_string())).await;
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalidate_entity_handler() {
        let (state, store) = state();
        let key = state.engine.cache.bare_key("pickup", "4").unwrap();
        state.engine.cache.set(key.as_str(), &json!({"id": 4}), None).await;

        let response = invalidate_entity_handler(
            State(state.clone()),
            Path(("pickup_request".to_string(), "4".to_string())),
            Query(InvalidateEntityQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(response.deleted, 1);
        assert!(store.get(key.as_str()).await.unwrap().is_none());

        let missing = invalidate_entity_handler(
            State(state),
            Path(("invoice".to_string(), "4".to_string())),
            Query(InvalidateEntityQuery::default()),
        )
        .await;
        assert!(matches!(missing, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_preload_without_source_is_rejected() {
        let (state, _) = state();
        let result = preload_handler(State(state), None).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_no_expiry_handler() {
        let (state, store) = state();
        store.set_persistent("audit:1", b"x").await.unwrap();
        store.set_ex("cache:user:1", b"1", 60).await.unwrap();

        let keys = no_expiry_handler(State(state), Query(NoExpiryQuery::default()))
            .await
            .unwrap();
        assert_eq!(keys.0, vec!["audit:1".to_string()]);
    }
}
