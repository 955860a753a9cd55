//! Maintenance Module
//!
//! Retention bounds for non-cache keys and cache warming.

mod preload;
mod retention;

pub use preload::{EntitySource, JsonFileSource, PreloadReport, Preloader, StaticSource};
pub use retention::{RetentionEnforcer, RetentionReport};
