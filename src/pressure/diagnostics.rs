//! Read-only key diagnostics: keys lacking an expiry, and memory per pattern.

use serde::Serialize;

use crate::error::Result;
use crate::kv::{KeyTtl, KeyType, KvStore};

/// Assumed bytes per element when a collection has to be estimated
const ESTIMATED_ELEMENT_BYTES: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternUsage {
    pub pattern: String,
    pub keys: u64,
    pub bytes: u64,
    /// True if any key's size had to be estimated from its length
    pub estimated: bool,
}

/// Bytes held by `key`. Uses MEMORY USAGE, falling back to a length-based
/// estimate. The flag is true when the figure is estimated.
pub async fn key_bytes(kv: &dyn KvStore, key: &str) -> Result<(u64, bool)> {
    if let Some(bytes) = kv.memory_usage(key).await? {
        return Ok((bytes, false));
    }
    let kind = kv.key_type(key).await?;
    let length = kv.length(key, kind).await?.unwrap_or(0);
    let payload = match kind {
        KeyType::String => length,
        _ => length * ESTIMATED_ELEMENT_BYTES,
    };
    Ok((key.len() as u64 + payload, true))
}

/// Up to `limit` keys (cache or not) that exist without any expiry.
pub async fn keys_without_expiry(
    kv: &dyn KvStore,
    limit: usize,
    batch: usize,
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut cursor = 0u64;
    loop {
        let page = kv.scan(cursor, "*", batch).await?;
        for key in page.keys {
            if kv.ttl(&key).await? == KeyTtl::Persistent {
                found.push(key);
                if found.len() >= limit {
                    return Ok(found);
                }
            }
        }
        cursor = page.cursor;
        if cursor == 0 {
            return Ok(found);
        }
        tokio::task::yield_now().await;
    }
}

/// Key count and total bytes for each glob pattern.
pub async fn pattern_usage(
    kv: &dyn KvStore,
    patterns: &[String],
    batch: usize,
) -> Result<Vec<PatternUsage>> {
    let mut report = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let mut usage = PatternUsage {
            pattern: pattern.clone(),
            keys: 0,
            bytes: 0,
            estimated: false,
        };
        let mut cursor = 0u64;
        loop {
            let page = kv.scan(cursor, pattern, batch).await?;
            for key in &page.keys {
                let (bytes, estimated) = key_bytes(kv, key).await?;
                usage.keys += 1;
                usage.bytes += bytes;
                usage.estimated |= estimated;
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        report.push(usage);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    async fn seeded() -> MemoryStore {
        let kv = MemoryStore::new();
        kv.set_ex("cache:user:1", b"0123456789", 60).await.unwrap();
        kv.set_ex("cache:user:2", b"01234", 60).await.unwrap();
        kv.set_persistent("audit:1", b"login").await.unwrap();
        kv.lpush("events:ip:10.0.0.1", b"a").await.unwrap();
        kv.lpush("events:ip:10.0.0.1", b"b").await.unwrap();
        kv
    }

    #[tokio::test]
    async fn test_keys_without_expiry() {
        let kv = seeded().await;
        let mut keys = keys_without_expiry(&kv, 10, 2).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["audit:1", "events:ip:10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_keys_without_expiry_respects_limit() {
        let kv = seeded().await;
        assert_eq!(keys_without_expiry(&kv, 1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pattern_usage_counts_keys() {
        let kv = seeded().await;
        let patterns = vec!["cache:user:*".to_string(), "nothing:*".to_string()];
        let usage = pattern_usage(&kv, &patterns, 10).await.unwrap();

        assert_eq!(usage[0].keys, 2);
        assert!(usage[0].bytes > 15);
        assert!(!usage[0].estimated);
        assert_eq!(usage[1].keys, 0);
        assert_eq!(usage[1].bytes, 0);
    }

    #[tokio::test]
    async fn test_usage_estimated_without_memory_usage() {
        let kv = seeded().await;
        kv.disable_memory_usage();

        let (bytes, estimated) = key_bytes(&kv, "cache:user:1").await.unwrap();
        assert!(estimated);
        assert_eq!(bytes, "cache:user:1".len() as u64 + 10);

        let (bytes, _) = key_bytes(&kv, "events:ip:10.0.0.1").await.unwrap();
        assert_eq!(bytes, "events:ip:10.0.0.1".len() as u64 + 2 * ESTIMATED_ELEMENT_BYTES);
    }
}
