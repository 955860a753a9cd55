//! Namespace Registry
//!
//! Static table of cache namespaces built once from configuration.

use std::collections::HashMap;

use crate::config::NamespaceConfig;
use crate::error::{CacheError, Result};

/// Prefix shared by every cache key; non-cache key families never use it.
pub const CACHE_KEY_ROOT: &str = "cache:";

/// A registered namespace with its derived key prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub name: String,
    /// `cache:<name>:`
    pub prefix: String,
    pub default_ttl_secs: u64,
    pub max_bytes: Option<usize>,
    pub aggregate: bool,
}

impl From<&NamespaceConfig> for Namespace {
    fn from(cfg: &NamespaceConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            prefix: format!("{}{}:", CACHE_KEY_ROOT, cfg.name),
            default_ttl_secs: cfg.default_ttl_secs,
            max_bytes: cfg.max_bytes,
            aggregate: cfg.aggregate,
        }
    }
}

impl Namespace {
    /// Glob matching every key in this namespace.
    pub fn pattern(&self) -> String {
        format!("{}*", self.prefix)
    }
}

/// Immutable lookup table of namespaces.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    by_name: HashMap<String, Namespace>,
}

impl NamespaceRegistry {
    pub fn from_config(namespaces: &[NamespaceConfig]) -> Self {
        Self {
            by_name: namespaces
                .iter()
                .map(|cfg| (cfg.name.clone(), Namespace::from(cfg)))
                .collect(),
        }
    }

    /// Looks up a namespace; an unknown name is a configuration error.
    pub fn get(&self, name: &str) -> Result<&Namespace> {
        self.by_name
            .get(name)
            .ok_or_else(|| CacheError::Configuration(format!("unknown namespace '{}'", name)))
    }

    /// Resolves the namespace owning `key` from its prefix.
    pub fn namespace_of(&self, key: &str) -> Option<&Namespace> {
        let rest = key.strip_prefix(CACHE_KEY_ROOT)?;
        let name = rest.split(':').next()?;
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
