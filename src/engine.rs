//! Engine
//!
//! Builds every component from one [`Config`] around a shared store client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, InvalidationMapper, NamespaceRegistry};
use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::kv::{KvStore, MemoryStore, RedisStore};
use crate::maintenance::{JsonFileSource, Preloader, RetentionEnforcer};
use crate::models::MemoryResponse;
use crate::pressure::{ttl_factor, MemoryMonitor, MemorySample, PressureLevel, TtlEnforcer};

pub struct Engine {
    pub config: Config,
    pub kv: Arc<dyn KvStore>,
    pub cache: CacheStore,
    pub mapper: InvalidationMapper,
    pub monitor: Arc<MemoryMonitor>,
    pub enforcer: TtlEnforcer,
    pub retention: RetentionEnforcer,
    pub preloader: Preloader,
    /// Set when running on the in-process store, which needs its own cleanup
    memory: Option<Arc<MemoryStore>>,
}

impl Engine {
    /// Wires the components around an existing store client.
    pub fn new(config: Config, kv: Arc<dyn KvStore>) -> Self {
        let cache = CacheStore::new(
            kv.clone(),
            NamespaceRegistry::from_config(&config.namespaces),
            config.scan_batch_size,
        );
        let mapper = InvalidationMapper::new(cache.clone(), &config.invalidation_rules);
        let monitor = Arc::new(MemoryMonitor::new(
            kv.clone(),
            &config.pressure,
            config.schedule.sample_interval_secs,
        ));
        let enforcer = TtlEnforcer::new(
            cache.clone(),
            monitor.clone(),
            config.pressure.clone(),
            config.eviction.clone(),
        );
        let retention =
            RetentionEnforcer::new(kv.clone(), config.retention.clone(), config.scan_batch_size);
        let preloader = Preloader::new(cache.clone(), config.preload.targets.clone());

        Self {
            config,
            kv,
            cache,
            mapper,
            monitor,
            enforcer,
            retention,
            preloader,
            memory: None,
        }
    }

    /// Engine over an in-process store.
    pub fn with_memory_store(config: Config, store: Arc<MemoryStore>) -> Self {
        let mut engine = Self::new(config, store.clone());
        engine.memory = Some(store);
        engine
    }

    /// Opens the configured backend and checks it answers.
    pub async fn connect(config: Config) -> Result<Self> {
        let engine = match config.store {
            StoreBackend::Redis => {
                let timeout = Duration::from_millis(config.operation_timeout_ms.max(1));
                let store = RedisStore::connect(&config.redis_url, timeout).await?;
                Self::new(config, Arc::new(store))
            }
            StoreBackend::Memory => {
                info!("using in-process store");
                Self::with_memory_store(config, Arc::new(MemoryStore::new()))
            }
        };
        engine.kv.ping().await?;
        Ok(engine)
    }

    pub fn memory_store(&self) -> Option<&Arc<MemoryStore>> {
        self.memory.as_ref()
    }

    /// Configured preload file, if any.
    pub fn preload_source(&self) -> Option<JsonFileSource> {
        self.config.preload.source.as_ref().map(JsonFileSource::new)
    }

    /// Every namespace pattern (by name) followed by every retention pattern.
    pub fn default_usage_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> =
            self.cache.namespaces().iter().map(|ns| ns.pattern()).collect();
        patterns.sort();
        patterns.extend(self.config.retention.iter().map(|p| p.pattern.clone()));
        patterns
    }

    /// Pressure view of the shared monitor, without sampling.
    pub fn memory_report(&self) -> MemoryResponse {
        self.report_for(&self.monitor)
    }

    /// A monitor over the same store whose trend is scaled to samples taken
    /// `interval_secs` apart.
    pub fn monitor_with_interval(&self, interval_secs: u64) -> MemoryMonitor {
        MemoryMonitor::new(self.kv.clone(), &self.config.pressure, interval_secs)
    }

    /// Takes `samples` readings `interval_secs` apart on a fresh monitor and
    /// reports on them. A store that reports no memory figures yields Low.
    pub async fn pressure_report(
        &self,
        samples: usize,
        interval_secs: u64,
    ) -> Result<MemoryResponse> {
        let monitor = self.monitor_with_interval(interval_secs);
        for i in 0..samples.max(1) {
            if i > 0 {
                tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            }
            if monitor.try_sample().await?.is_none() {
                debug!("store reported no memory figures");
            }
        }
        Ok(self.report_for(&monitor))
    }

    fn report_for(&self, monitor: &MemoryMonitor) -> MemoryResponse {
        let level = monitor.pressure_level();
        let trend = monitor.trend();
        MemoryResponse {
            level,
            ttl_factor: ttl_factor(level, &trend, &self.config.pressure.ttl_factors),
            trend,
            latest: monitor.latest(),
            samples: monitor.len(),
        }
    }

    /// Takes a memory sample and logs an alert at high or critical pressure.
    pub async fn sample_memory(&self) -> Option<MemorySample> {
        let sample = match self.monitor.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "memory sample failed");
                return None;
            }
        };
        let level = self.monitor.pressure_level();
        let trend = self.monitor.trend();
        match level {
            PressureLevel::Critical => error!(
                percent = %format!("{:.1}", sample.percent_used),
                trend = ?trend.direction,
                rate = trend.rate,
                "memory pressure critical"
            ),
            PressureLevel::High => warn!(
                percent = %format!("{:.1}", sample.percent_used),
                trend = ?trend.direction,
                rate = trend.rate,
                "memory pressure high"
            ),
            PressureLevel::Low | PressureLevel::Medium => {}
        }
        Some(sample)
    }
}
