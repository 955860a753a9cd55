//! Memory Pressure Monitor
//!
//! Samples store memory into a bounded ring buffer, classifies the latest
//! sample into a pressure level and fits a least-squares trend over the most
//! recent samples.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::PressureConfig;
use crate::error::{CacheError, Result};
use crate::kv::{KvStore, ServerInfo};

/// Fewer samples than this always yield a stable trend
pub const TREND_MIN_SAMPLES: usize = 5;
/// Trend is fitted over at most this many recent samples
pub const TREND_WINDOW: usize = 10;
/// Rates below this many points per hour count as stable
pub const STABLE_RATE: f64 = 1.0;

// == Pressure Level ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Level reached at each threshold, in threshold order.
    const AT_THRESHOLD: [PressureLevel; 4] = [
        PressureLevel::Medium,
        PressureLevel::High,
        PressureLevel::High,
        PressureLevel::Critical,
    ];

    /// Classifies `percent` against ascending thresholds; the last threshold
    /// reached wins.
    pub fn classify(percent: f64, thresholds: &[f64; 4]) -> Self {
        thresholds
            .iter()
            .zip(Self::AT_THRESHOLD)
            .filter(|(threshold, _)| percent >= **threshold)
            .map(|(_, level)| level)
            .last()
            .unwrap_or(PressureLevel::Low)
    }

    /// Position in low..critical, used to index per-level tables.
    pub fn index(&self) -> usize {
        match self {
            PressureLevel::Low => 0,
            PressureLevel::Medium => 1,
            PressureLevel::High => 2,
            PressureLevel::Critical => 3,
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureLevel::Low => "low",
            PressureLevel::Medium => "medium",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

// == Memory Sample ==
/// Which denominator produced `percent_used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentBasis {
    /// Server `maxmemory`
    MaxMemory,
    /// Configured `assumed_max_bytes`
    AssumedMax,
    /// Peak usage; the store has no hard limit
    Peak,
    /// Resident set size; last resort
    Rss,
}

impl PercentBasis {
    /// Only a real capacity makes the percentage a measure of pressure.
    pub fn is_bounded(&self) -> bool {
        matches!(self, PercentBasis::MaxMemory | PercentBasis::AssumedMax)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub bytes_used: u64,
    pub bytes_peak: u64,
    pub percent_used: f64,
    pub basis: PercentBasis,
}

impl MemorySample {
    /// Derives a sample from INFO. Prefers `maxmemory`, then the assumed
    /// capacity, then peak, then RSS. None if every denominator is zero.
    pub fn from_info(info: &ServerInfo, assumed_max: Option<u64>) -> Option<Self> {
        let (denominator, basis) = [
            (info.maxmemory, PercentBasis::MaxMemory),
            (assumed_max.unwrap_or(0), PercentBasis::AssumedMax),
            (info.used_memory_peak, PercentBasis::Peak),
            (info.used_memory_rss, PercentBasis::Rss),
        ]
        .into_iter()
        .find(|(d, _)| *d > 0)?;

        Some(Self {
            timestamp: Utc::now(),
            bytes_used: info.used_memory,
            bytes_peak: info.used_memory_peak,
            percent_used: info.used_memory as f64 / denominator as f64 * 100.0,
            basis,
        })
    }

    /// Synthetic sample measured against a hard limit.
    pub fn bounded(percent_used: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            bytes_used: 0,
            bytes_peak: 0,
            percent_used,
            basis: PercentBasis::MaxMemory,
        }
    }
}

// == Trend ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Stable,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Percentage points per hour
    pub rate: f64,
}

impl Trend {
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            rate: 0.0,
        }
    }

    /// Ordinary least squares of percent against sample index over the last
    /// `TREND_WINDOW` values, scaled to points per hour.
    pub fn fit(percents: &[f64], interval_secs: u64) -> Self {
        if percents.len() < TREND_MIN_SAMPLES || interval_secs == 0 {
            return Self::stable();
        }
        let window = &percents[percents.len().saturating_sub(TREND_WINDOW)..];
        let n = window.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = window.iter().sum::<f64>() / n;

        let (mut num, mut den) = (0.0, 0.0);
        for (i, y) in window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        let slope = if den == 0.0 { 0.0 } else { num / den };
        let rate = slope * 3600.0 / interval_secs as f64;

        let direction = if rate.abs() < STABLE_RATE {
            TrendDirection::Stable
        } else if rate > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };
        Self { direction, rate }
    }
}

// == Memory Monitor ==
/// Periodic sampler with a bounded history.
pub struct MemoryMonitor {
    kv: Arc<dyn KvStore>,
    samples: Mutex<VecDeque<MemorySample>>,
    capacity: usize,
    thresholds: [f64; 4],
    assumed_max: Option<u64>,
    /// Expected spacing of samples, used to scale the trend slope
    interval_secs: u64,
}

impl MemoryMonitor {
    pub fn new(kv: Arc<dyn KvStore>, config: &PressureConfig, interval_secs: u64) -> Self {
        let capacity = config.sample_capacity.max(1);
        Self {
            kv,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            thresholds: config.thresholds,
            assumed_max: config.assumed_max_bytes,
            interval_secs,
        }
    }

    /// Reads INFO, derives a sample and appends it to the history.
    pub async fn sample(&self) -> Result<MemorySample> {
        self.try_sample().await?.ok_or_else(|| {
            CacheError::Internal("store reported no memory figures".to_string())
        })
    }

    /// Like [`sample`](Self::sample), but Ok(None) when the store reports no
    /// memory figures at all. Nothing is recorded in that case.
    pub async fn try_sample(&self) -> Result<Option<MemorySample>> {
        let info = self.kv.info().await?;
        let Some(sample) = MemorySample::from_info(&info, self.assumed_max) else {
            return Ok(None);
        };
        debug!(
            percent = %format!("{:.1}", sample.percent_used),
            used = sample.bytes_used,
            basis = ?sample.basis,
            "memory sampled"
        );
        self.record(sample.clone());
        Ok(Some(sample))
    }

    /// Appends a sample, evicting the oldest once full.
    pub fn record(&self, sample: MemorySample) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<MemorySample> {
        self.samples.lock().back().cloned()
    }

    pub fn samples(&self) -> Vec<MemorySample> {
        self.samples.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn thresholds(&self) -> &[f64; 4] {
        &self.thresholds
    }

    /// Level of the latest sample. Low when nothing has been sampled or the
    /// store has no known capacity.
    pub fn pressure_level(&self) -> PressureLevel {
        match self.latest() {
            Some(sample) if sample.basis.is_bounded() => {
                PressureLevel::classify(sample.percent_used, &self.thresholds)
            }
            _ => PressureLevel::Low,
        }
    }

    pub fn trend(&self) -> Trend {
        let percents: Vec<f64> = {
            let samples = self.samples.lock();
            let skip = samples.len().saturating_sub(TREND_WINDOW);
            samples.iter().skip(skip).map(|s| s.percent_used).collect()
        };
        Trend::fit(&percents, self.interval_secs)
    }
}
