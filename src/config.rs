//! Configuration Module
//!
//! Handles loading and managing configuration from an optional JSON document
//! and environment variables. Environment variables override file values.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Which store implementation backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(CacheError::Configuration(format!(
                "unknown store backend '{}'",
                other
            ))),
        }
    }
}

/// A logical cache partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,
    /// TTL applied when a write does not specify one
    pub default_ttl_secs: u64,
    /// Largest serialized value accepted, None = unbounded
    #[serde(default)]
    pub max_bytes: Option<usize>,
    /// Holds derived aggregates rather than raw entities
    #[serde(default)]
    pub aggregate: bool,
}

impl NamespaceConfig {
    pub fn new(name: &str, default_ttl_secs: u64, max_bytes: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            default_ttl_secs,
            max_bytes,
            aggregate: false,
        }
    }

    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }
}

/// Maps a mutated entity type to the namespaces holding copies of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub entity_type: String,
    pub primary: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    /// Other entity types whose aggregates are derived from this one
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl InvalidationRule {
    fn new(entity_type: &str, primary: &[&str], related: &[&str], dependencies: &[&str]) -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            entity_type: entity_type.to_string(),
            primary: owned(primary),
            related: owned(related),
            dependencies: owned(dependencies),
        }
    }
}

/// Bound applied to a family of non-cache keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Glob pattern in store MATCH syntax
    pub pattern: String,
    pub ttl_secs: u64,
    #[serde(default)]
    pub description: String,
    /// Lists longer than this keep only the newest entries
    #[serde(default)]
    pub max_list_length: Option<usize>,
}

impl RetentionPolicy {
    pub fn new(pattern: &str, ttl_secs: u64, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            ttl_secs,
            description: description.to_string(),
            max_list_length: None,
        }
    }

    pub fn with_max_list_length(mut self, max: usize) -> Self {
        self.max_list_length = Some(max);
        self
    }
}

/// Memory pressure classification and TTL scaling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    /// Ascending percentages: medium from the first, high from the second,
    /// high and approaching critical from the third, critical from the fourth
    pub thresholds: [f64; 4],
    /// TTL factors for low, medium, high, critical
    pub ttl_factors: [f64; 4],
    /// Ring buffer capacity for memory samples
    pub sample_capacity: usize,
    /// Floor for rewritten TTLs
    pub min_ttl_secs: u64,
    /// Capacity to measure against when the store has no `maxmemory`
    pub assumed_max_bytes: Option<u64>,
    /// Keys whose TTLs are rescaled under pressure
    pub adaptive_pattern: String,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            thresholds: [60.0, 75.0, 85.0, 95.0],
            ttl_factors: [1.0, 0.75, 0.5, 0.25],
            sample_capacity: 100,
            min_ttl_secs: 60,
            assumed_max_bytes: None,
            adaptive_pattern: "*".to_string(),
        }
    }
}

/// Limits for the critical-pressure eviction sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Keys examined per sweep
    pub scan_limit: usize,
    /// Largest keys considered for eviction
    pub top_n: usize,
    /// Entries smaller than this are never evicted
    pub min_entry_bytes: u64,
    /// Hard cap on deletions per sweep
    pub max_evictions: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            scan_limit: 1000,
            top_n: 100,
            min_entry_bytes: 10 * 1024,
            max_evictions: 50,
        }
    }
}

/// One entity type to warm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadTarget {
    pub entity_type: String,
    pub namespace: String,
    pub limit: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// JSON file with hot entities, see `JsonFileSource`
    pub source: Option<PathBuf>,
    pub targets: Vec<PreloadTarget>,
}

/// Intervals for the periodic jobs, in seconds. Zero disables a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub stats_interval_secs: u64,
    pub sample_interval_secs: u64,
    pub retention_interval_secs: u64,
    pub optimize_interval_secs: u64,
    pub preload_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 300,
            sample_interval_secs: 60,
            retention_interval_secs: 3600,
            optimize_interval_secs: 300,
            preload_interval_secs: 1800,
            cleanup_interval_secs: 1,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Admin HTTP port
    pub server_port: u16,
    pub store: StoreBackend,
    pub redis_url: String,
    /// Upper bound on a single store command
    pub operation_timeout_ms: u64,
    /// COUNT hint passed to every SCAN
    pub scan_batch_size: usize,
    pub namespaces: Vec<NamespaceConfig>,
    pub invalidation_rules: Vec<InvalidationRule>,
    pub pressure: PressureConfig,
    pub eviction: EvictionConfig,
    pub retention: Vec<RetentionPolicy>,
    pub preload: PreloadConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            store: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            operation_timeout_ms: 250,
            scan_batch_size: 100,
            namespaces: vec![
                NamespaceConfig::new("user", 3600, Some(64 * 1024)),
                NamespaceConfig::new("pickup", 900, Some(256 * 1024)),
                NamespaceConfig::new("points", 600, Some(64 * 1024)),
                NamespaceConfig::new("stats", 300, Some(512 * 1024)).aggregate(),
                NamespaceConfig::new("general", 1800, Some(1024 * 1024)),
            ],
            invalidation_rules: vec![
                InvalidationRule::new("user", &["user"], &["stats"], &[]),
                InvalidationRule::new("pickup_request", &["pickup"], &["stats"], &["user"]),
                InvalidationRule::new("points_transaction", &["points"], &["stats"], &["user"]),
            ],
            pressure: PressureConfig::default(),
            eviction: EvictionConfig::default(),
            retention: vec![
                RetentionPolicy::new("events:ip:*", 7 * 86400, "Per-IP security event log")
                    .with_max_list_length(1000),
                RetentionPolicy::new("events:user:*", 30 * 86400, "Per-user activity log")
                    .with_max_list_length(500),
                RetentionPolicy::new("audit:*", 90 * 86400, "Audit trail entries"),
                RetentionPolicy::new("blacklist:token:*", 86400, "Revoked access tokens"),
                RetentionPolicy::new("ratelimit:*", 3600, "Rate limiter windows"),
            ],
            preload: PreloadConfig {
                source: None,
                targets: vec![
                    PreloadTarget {
                        entity_type: "user".to_string(),
                        namespace: "user".to_string(),
                        limit: 100,
                        ttl_secs: 3600,
                    },
                    PreloadTarget {
                        entity_type: "pickup_request".to_string(),
                        namespace: "pickup".to_string(),
                        limit: 200,
                        ttl_secs: 900,
                    },
                ],
            },
            schedule: ScheduleConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Creates a Config from defaults overridden by environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - Admin HTTP port (default: 3000)
    /// - `REDIS_URL` - Store URL (default: redis://127.0.0.1:6379)
    /// - `CACHE_STORE` - `redis` or `memory` (default: redis)
    /// - `STORE_TIMEOUT_MS` - Per-command timeout (default: 250)
    /// - `SCAN_BATCH_SIZE` - SCAN COUNT hint (default: 100)
    /// - `SAMPLE_CAPACITY` - Memory sample ring size (default: 100)
    /// - `SAMPLE_INTERVAL` - Seconds between memory samples (default: 60)
    /// - `OPTIMIZE_INTERVAL` - Seconds between TTL optimizations (default: 300)
    /// - `RETENTION_INTERVAL` - Seconds between retention sweeps (default: 3600)
    /// - `PRELOAD_SOURCE` - JSON file with hot entities (default: none)
    /// - `MAX_MEMORY_BYTES` - Capacity assumed when the store has no maxmemory
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Loads the JSON document at `path`. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CacheError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// File named by `CACHE_CONFIG` (if set), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let path = env::var_os("CACHE_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// `path` (or defaults), then env overrides, then validation.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(port) = env_parse("SERVER_PORT") {
            self.server_port = port;
        }
        if let Ok(url) = env::var("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(store) = env_parse("CACHE_STORE") {
            self.store = store;
        }
        if let Some(ms) = env_parse("STORE_TIMEOUT_MS") {
            self.operation_timeout_ms = ms;
        }
        if let Some(n) = env_parse("SCAN_BATCH_SIZE") {
            self.scan_batch_size = n;
        }
        if let Some(n) = env_parse("SAMPLE_CAPACITY") {
            self.pressure.sample_capacity = n;
        }
        if let Some(secs) = env_parse("SAMPLE_INTERVAL") {
            self.schedule.sample_interval_secs = secs;
        }
        if let Some(secs) = env_parse("OPTIMIZE_INTERVAL") {
            self.schedule.optimize_interval_secs = secs;
        }
        if let Some(secs) = env_parse("RETENTION_INTERVAL") {
            self.schedule.retention_interval_secs = secs;
        }
        if let Ok(path) = env::var("PRELOAD_SOURCE") {
            self.preload.source = Some(PathBuf::from(path));
        }
        if let Some(bytes) = env_parse("MAX_MEMORY_BYTES") {
            self.pressure.assumed_max_bytes = Some(bytes);
        }
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.pressure.thresholds;
        if t.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CacheError::Configuration(format!(
                "pressure thresholds must be strictly ascending, got {:?}",
                t
            )));
        }
        if let Some(f) = self
            .pressure
            .ttl_factors
            .iter()
            .find(|f| !(**f > 0.0 && **f <= 1.0))
        {
            return Err(CacheError::Configuration(format!(
                "TTL factor {} is outside (0, 1]",
                f
            )));
        }
        if self.pressure.sample_capacity == 0 || self.scan_batch_size == 0 {
            return Err(CacheError::Configuration(
                "sample_capacity and scan_batch_size must be non-zero".to_string(),
            ));
        }
        let ev = &self.eviction;
        if ev.scan_limit == 0 || ev.top_n == 0 || ev.max_evictions == 0 {
            return Err(CacheError::Configuration(format!(
                "eviction scan_limit, top_n and max_evictions must be non-zero, got {:?}",
                ev
            )));
        }
        if let Some(policy) = self
            .retention
            .iter()
            .find(|p| p.max_list_length == Some(0))
        {
            return Err(CacheError::Configuration(format!(
                "retention policy '{}' has a max_list_length of 0",
                policy.pattern
            )));
        }

        let mut names = HashSet::new();
        let mut aggregates = HashSet::new();
        for ns in &self.namespaces {
            if ns.name.is_empty() || ns.name.contains(':') {
                return Err(CacheError::Configuration(format!(
                    "invalid namespace name '{}'",
                    ns.name
                )));
            }
            if !names.insert(ns.name.as_str()) {
                return Err(CacheError::Configuration(format!(
                    "duplicate namespace '{}'",
                    ns.name
                )));
            }
            if ns.aggregate {
                aggregates.insert(ns.name.as_str());
            }
        }

        let mut entity_types = HashSet::new();
        for rule in &self.invalidation_rules {
            if !entity_types.insert(rule.entity_type.as_str()) {
                return Err(CacheError::Configuration(format!(
                    "entity type '{}' has more than one invalidation rule",
                    rule.entity_type
                )));
            }
            if let Some(unknown) = rule
                .primary
                .iter()
                .chain(rule.related.iter())
                .find(|ns| !names.contains(ns.as_str()))
            {
                return Err(CacheError::Configuration(format!(
                    "rule for '{}' references unknown namespace '{}'",
                    rule.entity_type, unknown
                )));
            }
            if let Some(plain) = rule
                .related
                .iter()
                .find(|ns| !aggregates.contains(ns.as_str()))
            {
                return Err(CacheError::Configuration(format!(
                    "rule for '{}' lists '{}' as related but it is not an aggregate namespace",
                    rule.entity_type, plain
                )));
            }
        }

        if let Some(target) = self
            .preload
            .targets
            .iter()
            .find(|t| !names.contains(t.namespace.as_str()))
        {
            return Err(CacheError::Configuration(format!(
                "preload target '{}' references unknown namespace '{}'",
                target.entity_type, target.namespace
            )));
        }

        Ok(())
    }
}
