//! Cache Guard - response caching and memory-pressure control over Redis
//!
//! Caches read-endpoint results under deterministic keys, invalidates them
//! when entities change, and keeps store memory bounded by shrinking TTLs or
//! evicting large entries as pressure rises.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod kv;
pub mod maintenance;
pub mod models;
pub mod pressure;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use engine::Engine;
pub use error::{CacheError, Result};
pub use tasks::Scheduler;
