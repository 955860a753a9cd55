//! Pressure Module
//!
//! Memory sampling, pressure classification and the enforcer that reacts to it.

mod adaptive;
mod diagnostics;
mod monitor;

pub use adaptive::{scaled_ttl, ttl_factor, EvictionReport, TtlEnforcer, STEEP_TREND_RATE};
pub use diagnostics::{key_bytes, keys_without_expiry, pattern_usage, PatternUsage};
pub use monitor::{
    MemoryMonitor, MemorySample, PercentBasis, PressureLevel, Trend, TrendDirection,
    STABLE_RATE, TREND_MIN_SAMPLES, TREND_WINDOW,
};
