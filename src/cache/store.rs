//! Cache Store Module
//!
//! Typed get/set/delete over a [`KvStore`] with namespace size caps, default
//! TTLs and metrics. Every operation fails open: errors are logged and
//! counted, and callers see a miss or `false`, never an error.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::key::{build_key, CacheKey};
use super::metrics::CacheMetrics;
use super::namespace::NamespaceRegistry;
use crate::error::{CacheError, Result};
use crate::kv::KvStore;

/// Outcome of a cursor sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    /// Keys returned by the scan
    pub matched: usize,
    /// Keys actually removed
    pub deleted: usize,
    /// False if the sweep stopped before the cursor returned to zero
    pub complete: bool,
}

// == Cache Store ==
/// Shared handle to the cache. Cloning is cheap.
#[derive(Clone)]
pub struct CacheStore {
    kv: Arc<dyn KvStore>,
    namespaces: Arc<NamespaceRegistry>,
    metrics: Arc<CacheMetrics>,
    /// COUNT hint for SCAN
    scan_batch: usize,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(kv: Arc<dyn KvStore>, namespaces: NamespaceRegistry, scan_batch: usize) -> Self {
        Self {
            kv,
            namespaces: Arc::new(namespaces),
            metrics: Arc::new(CacheMetrics::new()),
            scan_batch: scan_batch.max(1),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn scan_batch(&self) -> usize {
        self.scan_batch
    }

    /// Builds a key in a registered namespace.
    pub fn key<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        identifier: &str,
        params: Option<&P>,
    ) -> Result<CacheKey> {
        build_key(self.namespaces.get(namespace)?, identifier, params)
    }

    /// Shorthand for a key without parameters.
    pub fn bare_key(&self, namespace: &str, identifier: &str) -> Result<CacheKey> {
        self.key::<Value>(namespace, identifier, None)
    }

    // == Get ==
    /// Returns the cached value, or None on a miss or any failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.metrics.record_hit();
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(e) => {
                    self.metrics.record_error();
                    warn!(key, error = %e, "cached value failed to decode, treating as miss");
                    None
                }
            },
            Ok(None) => {
                self.metrics.record_miss();
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                self.metrics.record_error();
                warn!(key, error = %e, "cache get failed, treating as miss");
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key`, using the namespace default TTL when `ttl`
    /// is None. Returns false if nothing was written.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => {
                self.metrics.record_set();
                debug!(key, "cache set");
                true
            }
            Err(e @ CacheError::ValueTooLarge { .. }) => {
                self.metrics.record_rejected();
                info!(key, reason = %e, "cache set rejected");
                false
            }
            Err(e @ CacheError::Configuration(_)) => {
                self.metrics.record_error();
                error!(key, error = %e, "cache set skipped");
                false
            }
            Err(e) => {
                self.metrics.record_error();
                warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let namespace = self.namespaces.namespace_of(key).ok_or_else(|| {
            CacheError::Configuration(format!("key '{}' is outside every namespace", key))
        })?;

        let bytes = serde_json::to_vec(value)?;
        if let Some(limit) = namespace.max_bytes {
            if bytes.len() > limit {
                return Err(CacheError::ValueTooLarge {
                    namespace: namespace.name.clone(),
                    size: bytes.len(),
                    limit,
                });
            }
        }

        let ttl = ttl.unwrap_or(namespace.default_ttl_secs).max(1);
        self.kv.set_ex(key, &bytes, ttl).await
    }

    // == Delete ==
    /// Removes one key. Returns true only if a key was removed.
    pub async fn delete(&self, key: &str) -> bool {
        match self.kv.del(&[key.to_string()]).await {
            Ok(removed) => {
                self.metrics.record_invalidations(removed);
                removed > 0
            }
            Err(e) => {
                self.metrics.record_error();
                warn!(key, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Removes every key in `namespace`. Returns the number deleted.
    pub async fn delete_prefix(&self, namespace: &str) -> usize {
        let pattern = match self.namespaces.get(namespace) {
            Ok(ns) => ns.pattern(),
            Err(e) => {
                error!(namespace, error = %e, "namespace sweep skipped");
                return 0;
            }
        };
        let report = self.delete_pattern(&pattern).await;
        info!(
            namespace,
            deleted = report.deleted,
            complete = report.complete,
            "namespace invalidated"
        );
        report.deleted
    }

    /// Cursor sweep deleting every key matching `pattern`.
    ///
    /// Keys written under the pattern while the sweep runs may or may not be
    /// removed. A store failure stops the sweep at the current cursor.
    pub async fn delete_pattern(&self, pattern: &str) -> SweepReport {
        let mut report = SweepReport::default();
        let mut cursor = 0u64;

        loop {
            let page = match self.kv.scan(cursor, pattern, self.scan_batch).await {
                Ok(page) => page,
                Err(e) => {
                    self.abort_sweep(pattern, cursor, &report, e);
                    return report;
                }
            };

            if !page.keys.is_empty() {
                report.matched += page.keys.len();
                match self.kv.del(&page.keys).await {
                    Ok(removed) => {
                        report.deleted += removed as usize;
                        self.metrics.record_invalidations(removed);
                    }
                    Err(e) => {
                        self.abort_sweep(pattern, cursor, &report, e);
                        return report;
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        report.complete = true;
        report
    }

    fn abort_sweep(&self, pattern: &str, cursor: u64, report: &SweepReport, cause: CacheError) {
        self.metrics.record_error();
        let err = CacheError::PartialScan {
            cursor,
            completed: report.deleted,
            reason: cause.to_string(),
        };
        warn!(pattern, error = %err, "sweep stopped early");
    }
}
