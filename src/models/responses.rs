//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::MetricsSnapshot;
use crate::kv::ServerInfo;
use crate::maintenance::RetentionReport;
use crate::pressure::{MemorySample, PressureLevel, Trend};

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Whether the store answered PING
    pub store: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(store_reachable: bool) -> Self {
        Self {
            status: if store_reachable { "healthy" } else { "degraded" }.to_string(),
            store: store_reachable,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub metrics: MetricsSnapshot,
    /// None when INFO failed
    pub store: Option<ServerInfo>,
}

/// Response body for GET /memory
#[derive(Debug, Clone, Serialize)]
pub struct MemoryResponse {
    pub level: PressureLevel,
    pub trend: Trend,
    pub ttl_factor: f64,
    pub latest: Option<MemorySample>,
    pub samples: usize,
}

/// Response body for the invalidation endpoints
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationResponse {
    /// Namespace, or `entity_type:id`
    pub target: String,
    pub deleted: usize,
}

impl InvalidationResponse {
    pub fn new(target: impl Into<String>, deleted: usize) -> Self {
        Self {
            target: target.into(),
            deleted,
        }
    }
}

/// Response body for POST /retention
#[derive(Debug, Clone, Serialize)]
pub struct RetentionResponse {
    pub policies: Vec<RetentionReport>,
    pub expiry_set: usize,
    pub trimmed: usize,
}

impl RetentionResponse {
    pub fn new(policies: Vec<RetentionReport>) -> Self {
        let expiry_set = policies.iter().map(|r| r.expiry_set).sum();
        let trimmed = policies.iter().map(|r| r.trimmed).sum();
        Self {
            policies,
            expiry_set,
            trimmed,
        }
    }
}

/// Response body for POST /metrics/reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
    pub last_reset: DateTime<Utc>,
}

impl ResetResponse {
    pub fn new(last_reset: DateTime<Utc>) -> Self {
        Self {
            message: "Metrics reset".to_string(),
            last_reset,
        }
    }
}
