//! Background Tasks Module
//!
//! Periodic jobs sharing the engine: stats logging, memory sampling with
//! alerts, retention, TTL optimization, preload and in-process TTL cleanup.

mod cleanup;
mod scheduler;

pub use cleanup::spawn_cleanup_task;
pub use scheduler::Scheduler;
