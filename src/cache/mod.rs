//! Cache Module
//!
//! Key construction, fail-open store access, entity invalidation and the
//! endpoint adapter.

mod endpoint;
mod invalidation;
mod key;
mod metrics;
mod namespace;
mod store;


// Re-export public types
pub use endpoint::{
    CachePolicy, CacheStatus, CachedResponse, CachingHandler, EndpointRequest, EndpointResponse,
    Handler, Visibility,
};
pub use invalidation::InvalidationMapper;
pub use key::{build_key, escape_glob, param_hash, CacheKey, PARAM_HASH_LEN};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use namespace::{Namespace, NamespaceRegistry, CACHE_KEY_ROOT};
pub use store::{CacheStore, SweepReport};
