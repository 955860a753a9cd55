//! Integration Tests for the Admin API and Endpoint Caching
//!
//! Drives the admin router with `oneshot` requests against an engine on the
//! in-process store, alongside cached endpoint handlers sharing that store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cache_guard::cache::{
    CachePolicy, CacheStatus, CachingHandler, EndpointRequest, EndpointResponse, Handler,
};
use cache_guard::kv::{KeyTtl, KvStore, MemoryStore};
use cache_guard::{create_router, AppState, Config, Engine};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

struct Harness {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let engine = Arc::new(Engine::with_memory_store(Config::default(), store.clone()));
        Self { engine, store }
    }

    fn app(&self) -> Router {
        create_router(AppState::new(self.engine.clone()))
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    fn pickup_endpoint(&self) -> (CachingHandler<GetPickup>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CachingHandler::new(
            GetPickup {
                calls: calls.clone(),
            },
            self.engine.cache.clone(),
            CachePolicy::new("pickup", 300).id_param("id"),
        );
        (handler, calls)
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

struct GetPickup {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for GetPickup {
    fn operation(&self) -> &str {
        "get_pickup"
    }

    async fn call(&self, request: &EndpointRequest) -> EndpointResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let id = request.path_params.get("id").cloned().unwrap_or_default();
        EndpointResponse::ok(json!({"id": id, "version": n}))
    }
}

// == Endpoint Caching ==

#[tokio::test]
async fn test_entity_invalidation_reaches_cached_endpoint() {
    let harness = Harness::new();
    let (endpoint, calls) = harness.pickup_endpoint();
    let req = EndpointRequest::new().path("id", "42");

    assert_eq!(endpoint.handle(&req).await.status, CacheStatus::Miss);
    let hit = endpoint.handle(&req).await;
    assert_eq!(hit.status, CacheStatus::Hit);
    assert_eq!(hit.response.body["version"], 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (status, json) = harness
        .send("DELETE", "/entities/pickup_request/42", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["target"], "pickup_request:42");
    assert!(json["deleted"].as_u64().unwrap() >= 1);

    let after = endpoint.handle(&req).await;
    assert_eq!(after.status, CacheStatus::Miss);
    assert_eq!(after.response.body["version"], 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidation_leaves_other_entities_cached() {
    let harness = Harness::new();
    let (endpoint, calls) = harness.pickup_endpoint();
    let four = EndpointRequest::new().path("id", "4");
    let forty = EndpointRequest::new().path("id", "40");

    endpoint.handle(&four).await;
    endpoint.handle(&forty).await;
    harness.send("DELETE", "/entities/pickup_request/4", None).await;

    assert_eq!(endpoint.handle(&forty).await.status, CacheStatus::Hit);
    assert_eq!(endpoint.handle(&four).await.status, CacheStatus::Miss);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_endpoint_fails_open_when_store_down() {
    let harness = Harness::new();
    let (endpoint, calls) = harness.pickup_endpoint();
    harness.store.set_available(false);
    let req = EndpointRequest::new().path("id", "7");

    for _ in 0..3 {
        let res = endpoint.handle(&req).await;
        assert_eq!(res.status, CacheStatus::Miss);
        assert_eq!(res.response.status, 200);
        assert_eq!(res.response.body["id"], "7");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let (status, json) = harness.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["store"], false);
}

// == Health / Stats / Metrics ==

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new();
    let (status, json) = harness.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn test_stats_reflect_endpoint_traffic() {
    let harness = Harness::new();
    let (endpoint, _) = harness.pickup_endpoint();
    let req = EndpointRequest::new().path("id", "1");
    endpoint.handle(&req).await;
    endpoint.handle(&req).await;
    endpoint.handle(&req).await;

    let (status, json) = harness.send("GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metrics"]["hits"], 2);
    assert_eq!(json["metrics"]["misses"], 1);
    assert_eq!(json["metrics"]["sets"], 1);
    assert_eq!(json["store"]["total_keys"], 1);
}

#[tokio::test]
async fn test_reset_metrics_endpoint() {
    let harness = Harness::new();
    let (endpoint, _) = harness.pickup_endpoint();
    endpoint.handle(&EndpointRequest::new().path("id", "1")).await;

    let (status, json) = harness.send("POST", "/metrics/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("last_reset").is_some());

    let (_, stats) = harness.send("GET", "/stats", None).await;
    assert_eq!(stats["metrics"]["misses"], 0);
    assert_eq!(stats["metrics"]["sets"], 0);
}

// == Memory Pressure ==

#[tokio::test]
async fn test_memory_endpoint_reports_critical_pressure() {
    let harness = Harness::with_store(MemoryStore::with_max_memory(1024));
    harness
        .store
        .set_ex("cache:general:blob", &[b'x'; 1000], 600)
        .await
        .unwrap();
    assert!(harness.engine.sample_memory().await.is_some());

    let (status, json) = harness.send("GET", "/memory", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["level"], "critical");
    assert_eq!(json["ttl_factor"], 0.25);
    assert_eq!(json["samples"], 1);
    assert_eq!(json["trend"]["direction"], "stable");
}

#[tokio::test]
async fn test_memory_endpoint_without_samples() {
    let harness = Harness::new();
    let (status, json) = harness.send("GET", "/memory", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["level"], "low");
    assert_eq!(json["ttl_factor"], 1.0);
    assert!(json["latest"].is_null());
}

// == Invalidation ==

#[tokio::test]
async fn test_invalidate_namespace_endpoint() {
    let harness = Harness::new();
    let cache = &harness.engine.cache;
    for id in ["1", "2", "3"] {
        let key = cache.bare_key("user", id).unwrap();
        cache.set(key.as_str(), &json!({"id": id}), None).await;
    }
    let other = cache.bare_key("points", "1").unwrap();
    cache.set(other.as_str(), &json!(10), None).await;

    let (status, json) = harness.send("DELETE", "/namespaces/user", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 3);
    assert!(harness.store.get(other.as_str()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_unknown_namespace_returns_error_body() {
    let harness = Harness::new();
    let (status, json) = harness.send("DELETE", "/namespaces/billing", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("billing"));
}

#[tokio::test]
async fn test_invalidate_entity_without_related() {
    let harness = Harness::new();
    let cache = &harness.engine.cache;
    let pickup = cache.bare_key("pickup", "5").unwrap();
    let stats = cache.bare_key("stats", "pickup_request").unwrap();
    cache.set(pickup.as_str(), &json!({"id": 5}), None).await;
    cache.set(stats.as_str(), &json!({"total": 9}), None).await;

    let (status, json) = harness
        .send("DELETE", "/entities/pickup_request/5?related=false", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 1);
    assert!(harness.store.get(stats.as_str()).await.unwrap().is_some());

    let (_, json) = harness
        .send("DELETE", "/entities/pickup_request/5", None)
        .await;
    assert_eq!(json["deleted"], 1);
    assert!(harness.store.get(stats.as_str()).await.unwrap().is_none());
}

// == Maintenance ==

#[tokio::test]
async fn test_retention_endpoint_sets_missing_expiry() {
    let harness = Harness::new();
    harness.store.set_persistent("audit:login:1", b"{}").await.unwrap();
    harness.store.set_persistent("scratch:1", b"{}").await.unwrap();

    let (status, json) = harness.send("POST", "/retention", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["expiry_set"], 1);

    assert!(matches!(
        harness.store.ttl("audit:login:1").await.unwrap(),
        KeyTtl::Expires(_)
    ));
    assert_eq!(
        harness.store.ttl("scratch:1").await.unwrap(),
        KeyTtl::Persistent
    );
}

#[tokio::test]
async fn test_preload_endpoint_from_file() {
    let harness = Harness::new();
    let path = std::env::temp_dir()
        .join(format!("cache_guard_preload_{}.json", std::process::id()));
    std::fs::write(
        &path,
        json!({
            "user": [{"id": 1, "name": "Ada"}],
            "pickup_request": [{"id": 42, "status": "scheduled"}, {"id": 43}]
        })
        .to_string(),
    )
    .unwrap();

    let (status, json) = harness
        .send("POST", "/preload", Some(json!({"source": path})))
        .await;
    std::fs::remove_file(&path).ok();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["loaded"], 3);
    assert_eq!(json["failed"], 0);

    let key = harness.engine.cache.bare_key("pickup", "42").unwrap();
    let cached: Option<Value> = harness.engine.cache.get(key.as_str()).await;
    assert_eq!(cached.unwrap()["status"], "scheduled");
}

#[tokio::test]
async fn test_preload_endpoint_without_source() {
    let harness = Harness::new();
    let (status, json) = harness.send("POST", "/preload", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

// == Diagnostics ==

#[tokio::test]
async fn test_no_expiry_endpoint_respects_limit() {
    let harness = Harness::new();
    for i in 0..5 {
        harness
            .store
            .set_persistent(&format!("orphan:{}", i), b"1")
            .await
            .unwrap();
    }
    harness.store.set_ex("cache:user:1", b"1", 60).await.unwrap();

    let (status, json) = harness.send("GET", "/keys/no-expiry?limit=3", None).await;
    assert_eq!(status, StatusCode::OK);
    let keys = json.as_array().unwrap();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k.as_str().unwrap().starts_with("orphan:")));
}

#[tokio::test]
async fn test_usage_endpoint_with_patterns() {
    let harness = Harness::new();
    let cache = &harness.engine.cache;
    for id in ["1", "2"] {
        let key = cache.bare_key("user", id).unwrap();
        cache.set(key.as_str(), &json!({"id": id}), None).await;
    }

    let (status, json) = harness
        .send("GET", "/usage?patterns=cache:user:*,events:*", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["pattern"], "cache:user:*");
    assert_eq!(rows[0]["keys"], 2);
    assert!(rows[0]["bytes"].as_u64().unwrap() > 0);
    assert_eq!(rows[1]["keys"], 0);
}

#[tokio::test]
async fn test_unknown_route() {
    let harness = Harness::new();
    let response = harness
        .app()
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
