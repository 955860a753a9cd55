//! Cache Preloader
//!
//! Warms hot entities into the cache under their canonical keys. Failures for
//! single entities are logged and skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::PreloadTarget;
use crate::error::{CacheError, Result};

/// Supplier of frequently read entities, implemented by the business layer.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Up to `limit` `(id, entity)` pairs of `entity_type`.
    async fn hot_entities(&self, entity_type: &str, limit: usize) -> Result<Vec<(String, Value)>>;
}

// == Static Source ==
/// Entities held in memory, keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entities: HashMap<String, Vec<Value>>,
}

impl StaticSource {
    /// Parses `{ "<entity_type>": [ {"id": ..}, .. ] }`.
    pub fn from_json(document: Value) -> Result<Self> {
        let entities: HashMap<String, Vec<Value>> = serde_json::from_value(document)
            .map_err(|e| CacheError::InvalidRequest(format!("invalid preload document: {}", e)))?;
        Ok(Self { entities })
    }

    pub fn insert(&mut self, entity_type: &str, entity: Value) {
        self.entities.entry(entity_type.to_string()).or_default().push(entity);
    }
}

/// String form of an entity's `id` field.
fn entity_id(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl EntitySource for StaticSource {
    async fn hot_entities(&self, entity_type: &str, limit: usize) -> Result<Vec<(String, Value)>> {
        let Some(entities) = self.entities.get(entity_type) else {
            return Ok(Vec::new());
        };
        Ok(entities
            .iter()
            .filter_map(|entity| match entity_id(entity) {
                Some(id) => Some((id, entity.clone())),
                None => {
                    warn!(entity_type, "preload entity without id skipped");
                    None
                }
            })
            .take(limit)
            .collect())
    }
}

// == JSON File Source ==
/// Reads a [`StaticSource`] document from disk on every call.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> Result<StaticSource> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        StaticSource::from_json(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl EntitySource for JsonFileSource {
    async fn hot_entities(&self, entity_type: &str, limit: usize) -> Result<Vec<(String, Value)>> {
        self.load().await?.hot_entities(entity_type, limit).await
    }
}

// == Preloader ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: usize,
    /// Targets whose source could not be read at all
    pub skipped_targets: usize,
}

#[derive(Clone)]
pub struct Preloader {
    cache: CacheStore,
    targets: Vec<PreloadTarget>,
}

impl Preloader {
    pub fn new(cache: CacheStore, targets: Vec<PreloadTarget>) -> Self {
        Self { cache, targets }
    }

    pub fn targets(&self) -> &[PreloadTarget] {
        &self.targets
    }

    pub async fn preload(&self, source: &dyn EntitySource) -> PreloadReport {
        let mut report = PreloadReport::default();
        for target in &self.targets {
            let entities = match source.hot_entities(&target.entity_type, target.limit).await {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(entity_type = %target.entity_type, error = %e, "preload source failed");
                    report.skipped_targets += 1;
                    continue;
                }
            };

            for (id, entity) in entities {
                let key = match self.cache.bare_key(&target.namespace, &id) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(namespace = %target.namespace, error = %e, "preload key failed");
                        report.failed += 1;
                        continue;
                    }
                };
                if self.cache.set(key.as_str(), &entity, Some(target.ttl_secs)).await {
                    report.loaded += 1;
                } else {
                    debug!(key = %key, "preload write skipped");
                    report.failed += 1;
                }
            }
        }
        info!(
            loaded = report.loaded,
            failed = report.failed,
            skipped_targets = report.skipped_targets,
            "cache preload finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NamespaceRegistry;
    use crate::config::Config;
    use crate::kv::{KvStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn preloader() -> (Preloader, CacheStore, Arc<MemoryStore>) {
        let config = Config::default();
        let kv = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(
            kv.clone(),
            NamespaceRegistry::from_config(&config.namespaces),
            10,
        );
        (Preloader::new(cache.clone(), config.preload.targets), cache, kv)
    }

    fn source() -> StaticSource {
        StaticSource::from_json(json!({
            "user": [{"id": 1, "name": "Ada"}, {"id": "2", "name": "Lin"}, {"name": "anon"}],
            "pickup_request": [{"id": 9, "status": "scheduled"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_preload_writes_canonical_keys() {
        let (preloader, cache, kv) = preloader();
        let report = preloader.preload(&source()).await;

        assert_eq!(report.loaded, 3);
        assert_eq!(report.failed, 0);
        let user: Option<Value> = cache.get("cache:user:1").await;
        assert_eq!(user, Some(json!({"id": 1, "name": "Ada"})));
        assert!(cache.get::<Value>("cache:pickup:9").await.is_some());

        let ttl = kv.ttl("cache:pickup:9").await.unwrap().remaining().unwrap();
        assert!(ttl > 890 && ttl <= 900);
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let (cache_preloader, _, kv) = preloader();
        let mut targets = cache_preloader.targets().to_vec();
        targets[0].limit = 1;
        let preloader = Preloader::new(cache_preloader.cache.clone(), targets);

        let report = preloader.preload(&source()).await;
        assert_eq!(report.loaded, 2);
        assert_eq!(kv.len().await, 2);
    }

    #[tokio::test]
    async fn test_oversize_entity_skipped_not_fatal() {
        let (preloader, cache, _) = preloader();
        let mut source = source();
        source.insert("user", json!({"id": 3, "blob": "x".repeat(100 * 1024)}));

        let report = preloader.preload(&source).await;
        assert_eq!(report.loaded, 3);
        assert_eq!(report.failed, 1);
        assert!(cache.get::<Value>("cache:user:3").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_skips_targets() {
        let (preloader, _, _) = preloader();
        let source = JsonFileSource::new("/nonexistent/hot.json");
        let report = preloader.preload(&source).await;
        assert_eq!(report.skipped_targets, 2);
        assert_eq!(report.loaded, 0);
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let path = std::env::temp_dir()
            .join(format!("cache_guard_preload_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"user": [{"id": 5}]}"#).unwrap();

        let entities = JsonFileSource::new(&path).hot_entities("user", 10).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(entities, vec![("5".to_string(), json!({"id": 5}))]);
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(StaticSource::from_json(json!(["not", "a", "map"])).is_err());
    }
}
