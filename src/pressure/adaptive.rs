//! Adaptive TTL / Eviction Enforcer
//!
//! Shrinks live TTLs in proportion to memory pressure and, at critical
//! pressure, evicts the largest cache entries.
//!
//! Rewrites are recorded in a ledger of (factor, expected expiry) per key. A
//! key whose remaining TTL still matches its ledger entry has already been
//! scaled, so a later run only applies the difference between the old and new
//! factor. A key that no longer matches was rewritten by a fresh set and is
//! scaled from scratch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::diagnostics::key_bytes;
use super::monitor::{MemoryMonitor, PressureLevel, Trend, TrendDirection};
use crate::cache::{CacheStore, CACHE_KEY_ROOT};
use crate::config::{EvictionConfig, PressureConfig};
use crate::error::CacheError;
use crate::kv::KeyTtl;

/// Trend rate (points per hour) beyond which the factor is adjusted
pub const STEEP_TREND_RATE: f64 = 5.0;
/// Remaining TTL within this many seconds of the ledger counts as unchanged
const LEDGER_TOLERANCE_SECS: u64 = 2;

/// Scaling factor for a pressure level and trend, clamped to at most 1.0.
pub fn ttl_factor(level: PressureLevel, trend: &Trend, factors: &[f64; 4]) -> f64 {
    let base = factors[level.index()];
    let adjustment = match trend.direction {
        TrendDirection::Increasing if trend.rate > STEEP_TREND_RATE => 0.9,
        TrendDirection::Decreasing if trend.rate < -STEEP_TREND_RATE => 1.1,
        _ => 1.0,
    };
    (base * adjustment).min(1.0)
}

/// `max(min_ttl, floor(remaining * scale))`
pub fn scaled_ttl(remaining: u64, scale: f64, min_ttl: u64) -> u64 {
    ((remaining as f64 * scale).floor() as u64).max(min_ttl)
}

#[derive(Debug, Clone, Copy)]
struct Applied {
    factor: f64,
    expires_at: Instant,
}

impl Applied {
    fn matches(&self, remaining: u64, now: Instant) -> bool {
        let expected = self.expires_at.saturating_duration_since(now).as_secs();
        expected.abs_diff(remaining) <= LEDGER_TOLERANCE_SECS
    }
}

/// Outcome of one critical-pressure pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvictionReport {
    pub examined: usize,
    pub evicted: usize,
    pub freed_bytes: u64,
    pub ttl_updated: usize,
}

// == Enforcer ==
pub struct TtlEnforcer {
    cache: CacheStore,
    monitor: Arc<MemoryMonitor>,
    pressure: PressureConfig,
    eviction: EvictionConfig,
    ledger: Mutex<HashMap<String, Applied>>,
}

impl TtlEnforcer {
    pub fn new(
        cache: CacheStore,
        monitor: Arc<MemoryMonitor>,
        pressure: PressureConfig,
        eviction: EvictionConfig,
    ) -> Self {
        Self {
            cache,
            monitor,
            pressure,
            eviction,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    /// Factor for the monitor's current level and trend.
    pub fn current_factor(&self) -> f64 {
        ttl_factor(
            self.monitor.pressure_level(),
            &self.monitor.trend(),
            &self.pressure.ttl_factors,
        )
    }

    /// Rescales every expiring key at the current factor. Returns the number
    /// of keys rewritten.
    pub async fn apply_adaptive_ttl(&self) -> usize {
        self.apply_factor(self.current_factor()).await
    }

    /// Rescales every expiring key matching the adaptive pattern by `factor`.
    /// No-op at 1.0 or above; a TTL is never extended.
    pub async fn apply_factor(&self, factor: f64) -> usize {
        if factor >= 1.0 {
            return 0;
        }
        self.prune_ledger();

        let kv = self.cache.kv();
        let pattern = self.pressure.adaptive_pattern.as_str();
        let mut updated = 0;
        let mut cursor = 0u64;

        loop {
            let page = match kv.scan(cursor, pattern, self.cache.scan_batch()).await {
                Ok(page) => page,
                Err(e) => {
                    self.abort("adaptive ttl", cursor, updated, e);
                    return updated;
                }
            };

            for key in &page.keys {
                let remaining = match kv.ttl(key).await {
                    Ok(KeyTtl::Expires(secs)) if secs > 0 => secs,
                    Ok(_) => continue,
                    Err(e) => {
                        self.abort("adaptive ttl", cursor, updated, e);
                        return updated;
                    }
                };
                let Some(target) = self.target_ttl(key, remaining, factor) else {
                    continue;
                };
                match kv.expire(key, target).await {
                    Ok(true) => {
                        self.ledger.lock().insert(
                            key.clone(),
                            Applied {
                                factor,
                                expires_at: Instant::now() + Duration::from_secs(target),
                            },
                        );
                        updated += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.abort("adaptive ttl", cursor, updated, e);
                        return updated;
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        if updated > 0 {
            info!(factor, updated, "adaptive ttl applied");
        }
        updated
    }

    fn target_ttl(&self, key: &str, remaining: u64, factor: f64) -> Option<u64> {
        let scale = match self.ledger.lock().get(key) {
            Some(applied) if applied.matches(remaining, Instant::now()) => {
                if factor >= applied.factor {
                    return None;
                }
                factor / applied.factor
            }
            _ => factor,
        };
        let target = scaled_ttl(remaining, scale, self.pressure.min_ttl_secs);
        (target < remaining).then_some(target)
    }

    fn prune_ledger(&self) {
        let now = Instant::now();
        self.ledger.lock().retain(|_, applied| applied.expires_at > now);
    }

    /// Evicts the largest cache entries, then shrinks TTLs. Does nothing
    /// unless pressure is critical.
    pub async fn handle_critical_pressure(&self) -> EvictionReport {
        if self.monitor.pressure_level() != PressureLevel::Critical {
            return EvictionReport::default();
        }

        let mut report = EvictionReport::default();
        let mut sized: Vec<(String, u64)> = self
            .collect_sizes(&mut report)
            .await
            .into_iter()
            .filter(|(key, bytes)| {
                *bytes >= self.eviction.min_entry_bytes
                    && self.cache.namespaces().namespace_of(key).is_some()
            })
            .collect();

        let top_n = self.eviction.top_n.max(1);
        if top_n < sized.len() {
            sized.select_nth_unstable_by(top_n - 1, |a, b| b.1.cmp(&a.1));
            sized.truncate(top_n);
        }
        sized.sort_unstable_by(|a, b| b.1.cmp(&a.1));

        let victims: Vec<(String, u64)> =
            sized.into_iter().take(self.eviction.max_evictions).collect();

        if !victims.is_empty() {
            let keys: Vec<String> = victims.iter().map(|(k, _)| k.clone()).collect();
            match self.cache.kv().del(&keys).await {
                Ok(removed) => {
                    report.evicted = removed as usize;
                    report.freed_bytes = victims.iter().map(|(_, b)| b).sum();
                    self.cache.metrics().record_evictions(removed);
                    warn!(
                        evicted = report.evicted,
                        freed_bytes = report.freed_bytes,
                        "evicted largest cache entries"
                    );
                }
                Err(e) => {
                    self.cache.metrics().record_error();
                    warn!(error = %e, "eviction failed");
                }
            }
        }

        report.ttl_updated = self.apply_adaptive_ttl().await;
        report
    }

    /// Sizes of up to `scan_limit` cache keys.
    async fn collect_sizes(&self, report: &mut EvictionReport) -> Vec<(String, u64)> {
        let kv = self.cache.kv();
        let pattern = format!("{}*", CACHE_KEY_ROOT);
        let mut sized = Vec::new();
        let mut cursor = 0u64;

        while report.examined < self.eviction.scan_limit {
            let page = match kv.scan(cursor, &pattern, self.cache.scan_batch()).await {
                Ok(page) => page,
                Err(e) => {
                    self.abort("eviction scan", cursor, report.examined, e);
                    break;
                }
            };
            for key in page.keys {
                if report.examined >= self.eviction.scan_limit {
                    break;
                }
                report.examined += 1;
                match key_bytes(kv.as_ref(), &key).await {
                    Ok((bytes, _)) => sized.push((key, bytes)),
                    Err(e) => debug!(key, error = %e, "size lookup failed"),
                }
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        sized
    }

    /// One optimization pass, chosen by the current level.
    pub async fn optimize(&self) -> EvictionReport {
        let level = self.monitor.pressure_level();
        let trend = self.monitor.trend();
        let percent = self.monitor.latest().map(|s| s.percent_used).unwrap_or(0.0);
        match level {
            PressureLevel::Critical => {
                error!(
                    percent = %format!("{:.1}", percent),
                    trend = ?trend.direction,
                    rate = trend.rate,
                    "critical memory pressure, evicting"
                );
                self.handle_critical_pressure().await
            }
            PressureLevel::High => {
                warn!(
                    percent = %format!("{:.1}", percent),
                    trend = ?trend.direction,
                    "high memory pressure, shrinking ttls"
                );
                EvictionReport {
                    ttl_updated: self.apply_adaptive_ttl().await,
                    ..EvictionReport::default()
                }
            }
            PressureLevel::Low | PressureLevel::Medium => EvictionReport {
                ttl_updated: self.apply_adaptive_ttl().await,
                ..EvictionReport::default()
            },
        }
    }

    fn abort(&self, sweep: &str, cursor: u64, completed: usize, cause: CacheError) {
        self.cache.metrics().record_error();
        let err = CacheError::PartialScan {
            cursor,
            completed,
            reason: cause.to_string(),
        };
        warn!(sweep, error = %err, "sweep stopped early");
    }
}
