//! Endpoint Cache Adapter
//!
//! [`CachingHandler`] wraps any read [`Handler`] and serves its responses from
//! the cache. The key varies on the operation, path parameters, a chosen
//! subset of query parameters and headers, and optionally the caller.
//! Mutating handlers are never wrapped; they invalidate after commit instead.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::key::CacheKey;
use super::store::CacheStore;
use crate::error::Result;

// == Request / Response ==
/// The parts of an inbound read request the cache can vary on.
#[derive(Debug, Clone, Default)]
pub struct EndpointRequest {
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Header names are matched case-insensitively
    pub headers: HashMap<String, String>,
    /// Authenticated caller, if any
    pub user_id: Option<String>,
}

impl EndpointRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, name: &str, value: impl Into<String>) -> Self {
        self.path_params.insert(name.to_string(), value.into());
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn header_value(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Canonical serializable result of a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Value,
}

impl EndpointResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Only 2xx responses are cached.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// == Handler Trait ==
/// A read operation that can be wrapped by [`CachingHandler`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable identity of the operation, part of every cache key.
    fn operation(&self) -> &str;

    async fn call(&self, request: &EndpointRequest) -> EndpointResponse;
}

// == Cache Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// How a wrapped endpoint is cached.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub namespace: String,
    pub ttl_secs: u64,
    pub visibility: Visibility,
    /// Path parameter holding the entity id; its value becomes the key
    /// identifier so entity invalidation reaches these entries
    pub id_param: Option<String>,
    pub query_params: Vec<String>,
    pub headers: Vec<String>,
    pub user_scoped: bool,
}

impl CachePolicy {
    pub fn new(namespace: &str, ttl_secs: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            ttl_secs,
            visibility: Visibility::Public,
            id_param: None,
            query_params: Vec::new(),
            headers: Vec::new(),
            user_scoped: false,
        }
    }

    pub fn id_param(mut self, name: &str) -> Self {
        self.id_param = Some(name.to_string());
        self
    }

    pub fn vary_query(mut self, names: &[&str]) -> Self {
        self.query_params = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn vary_headers(mut self, names: &[&str]) -> Self {
        self.headers = names.iter().map(|s| s.to_ascii_lowercase()).collect();
        self
    }

    /// Varies on the caller and marks responses private.
    pub fn per_user(mut self) -> Self {
        self.user_scoped = true;
        self.visibility = Visibility::Private;
        self
    }

    /// `public, max-age=N` or `private, max-age=N`.
    pub fn cache_control(&self) -> String {
        let scope = match self.visibility {
            Visibility::Public => "public",
            Visibility::Private => "private",
        };
        format!("{}, max-age={}", scope, self.ttl_secs)
    }
}

// == Cached Response ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Caching was disabled for this call
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// A handler response annotated with cache metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub response: EndpointResponse,
    pub status: CacheStatus,
    pub cache_control: String,
}

/// Renders the body with `X-Cache` and `Cache-Control` headers.
impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.response.body)).into_response();
        let headers = response.headers_mut();
        headers.insert("x-cache", HeaderValue::from_static(self.status.as_str()));
        if let Ok(value) = HeaderValue::from_str(&self.cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        response
    }
}

// == Caching Handler ==
/// Wraps `H`, serving cache hits and storing successful misses.
pub struct CachingHandler<H> {
    inner: H,
    cache: CacheStore,
    policy: CachePolicy,
}

impl<H: Handler> CachingHandler<H> {
    pub fn new(inner: H, cache: CacheStore, policy: CachePolicy) -> Self {
        Self {
            inner,
            cache,
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Composite key for `request`.
    pub fn key_for(&self, request: &EndpointRequest) -> Result<CacheKey> {
        let identifier = self
            .policy
            .id_param
            .as_ref()
            .and_then(|name| request.path_params.get(name))
            .map(String::as_str)
            .unwrap_or_else(|| self.inner.operation());

        let mut variance: BTreeMap<String, Value> = BTreeMap::new();
        variance.insert("op".into(), Value::from(self.inner.operation()));
        for (name, value) in &request.path_params {
            if self.policy.id_param.as_deref() != Some(name.as_str()) {
                variance.insert(format!("path.{}", name), Value::from(value.as_str()));
            }
        }
        for name in &self.policy.query_params {
            if let Some(value) = request.query.get(name) {
                variance.insert(format!("query.{}", name), Value::from(value.as_str()));
            }
        }
        for name in &self.policy.headers {
            if let Some(value) = request.header_value(name) {
                variance.insert(format!("header.{}", name), Value::from(value.as_str()));
            }
        }
        if self.policy.user_scoped {
            let user = request.user_id.as_deref().unwrap_or("anonymous");
            variance.insert("user".into(), Value::from(user));
        }

        self.cache
            .key(&self.policy.namespace, identifier, Some(&variance))
    }

    /// Runs the request through the cache.
    ///
    /// A caching failure never changes the handler's result; it only turns
    /// the call into a miss or a bypass.
    pub async fn handle(&self, request: &EndpointRequest) -> CachedResponse {
        let cache_control = self.policy.cache_control();

        let key = match self.key_for(request) {
            Ok(key) => key,
            Err(e) => {
                error!(
                    operation = self.inner.operation(),
                    error = %e,
                    "endpoint cache disabled for call"
                );
                return CachedResponse {
                    response: self.inner.call(request).await,
                    status: CacheStatus::Bypass,
                    cache_control,
                };
            }
        };

        if let Some(response) = self.cache.get::<EndpointResponse>(key.as_str()).await {
            return CachedResponse {
                response,
                status: CacheStatus::Hit,
                cache_control,
            };
        }

        let response = self.inner.call(request).await;
        if response.is_success() {
            self.cache
                .set(key.as_str(), &response, Some(self.policy.ttl_secs))
                .await;
        } else {
            debug!(key = %key, status = response.status, "error response not cached");
        }

        CachedResponse {
            response,
            status: CacheStatus::Miss,
            cache_control,
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for CachingHandler<H> {
    fn operation(&self) -> &str {
        self.inner.operation()
    }

    async fn call(&self, request: &EndpointRequest) -> EndpointResponse {
        self.handle(request).await.response
    }
}
