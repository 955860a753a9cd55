//! Invalidation Mapper
//!
//! Translates "entity X changed" into the exact cache keys that may now be
//! stale. Must be called after the write commits, never before.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use super::key::CacheKey;
use super::store::CacheStore;
use crate::config::InvalidationRule;

/// Entity-type keyed table of invalidation rules.
#[derive(Clone)]
pub struct InvalidationMapper {
    cache: CacheStore,
    rules: HashMap<String, InvalidationRule>,
}

impl InvalidationMapper {
    pub fn new(cache: CacheStore, rules: &[InvalidationRule]) -> Self {
        Self {
            cache,
            rules: rules
                .iter()
                .map(|rule| (rule.entity_type.clone(), rule.clone()))
                .collect(),
        }
    }

    pub fn rule(&self, entity_type: &str) -> Option<&InvalidationRule> {
        self.rules.get(entity_type)
    }

    /// Removes cached copies of one entity. Returns the number of keys deleted.
    ///
    /// Primary namespaces lose the entity's key and its parameter variants.
    /// With `include_related`, related namespaces lose only the aggregate keys
    /// scoped to this entity type (and to its declared dependencies).
    pub async fn invalidate_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        include_related: bool,
    ) -> usize {
        let Some(rule) = self.rules.get(entity_type) else {
            warn!(entity_type, entity_id, "no invalidation rule for entity type");
            return 0;
        };

        let mut deleted = 0;
        for namespace in &rule.primary {
            deleted += self.drop_key_family(namespace, entity_id).await;
        }

        if include_related {
            let scopes = scopes_for(rule);
            for namespace in &rule.related {
                if !self.is_aggregate(namespace) {
                    warn!(
                        entity_type,
                        namespace = %namespace,
                        "related namespace is not an aggregate, skipped"
                    );
                    continue;
                }
                for scope in &scopes {
                    deleted += self.drop_key_family(namespace, scope).await;
                }
            }
        }

        info!(entity_type, entity_id, deleted, include_related, "entity invalidated");
        deleted
    }

    /// Coarse invalidation of a whole namespace.
    pub async fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.cache.delete_prefix(namespace).await
    }

    fn is_aggregate(&self, namespace: &str) -> bool {
        self.cache
            .namespaces()
            .get(namespace)
            .map(|ns| ns.aggregate)
            .unwrap_or(false)
    }

    /// Deletes `namespace:identifier` and every `namespace:identifier:<hash>`.
    async fn drop_key_family(&self, namespace: &str, identifier: &str) -> usize {
        let key: CacheKey = match self.cache.bare_key(namespace, identifier) {
            Ok(key) => key,
            Err(e) => {
                error!(namespace, error = %e, "invalidation skipped");
                return 0;
            }
        };

        let exact = usize::from(self.cache.delete(key.as_str()).await);
        let variants = self.cache.delete_pattern(&key.variants_pattern()).await;
        debug!(key = %key, exact, variants = variants.deleted, "key family dropped");
        exact + variants.deleted
    }
}

/// Aggregate scopes touched by a change: the entity type itself, then its
/// dependencies, without duplicates.
fn scopes_for(rule: &InvalidationRule) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(&rule.entity_type)
        .chain(rule.dependencies.iter())
        .filter(|scope| seen.insert(scope.as_str()))
        .cloned()
        .collect()
}
