//! In-Process Store
//!
//! Ordered map with millisecond TTLs implementing [`KvStore`]. Mirrors the
//! reply semantics of the remote store closely enough to run the whole engine
//! against it: lazy expiry on access, key-anchored SCAN cursors, string and list
//! values, and an INFO reply computed from tracked byte usage.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{glob_match, KeyTtl, KeyType, KvStore, ScanPage, ServerInfo};
use crate::error::{CacheError, Result};

/// Fixed per-key bookkeeping added to every size estimate
const ENTRY_OVERHEAD: u64 = 56;
/// Per-element bookkeeping for list nodes
const LIST_NODE_OVERHEAD: u64 = 16;
/// Open cursors kept before the oldest abandoned scan is forgotten
const MAX_OPEN_CURSORS: usize = 1024;

// == Stored Value ==
#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

// == Stored Entry ==
/// A single key with its value and expiry.
#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    expires_at: Option<u64>,
}

impl StoredEntry {
    fn new(value: StoredValue, ttl_seconds: Option<u64>) -> Self {
        let expires_at = ttl_seconds.map(|ttl| current_timestamp_ms() + ttl * 1000);
        Self { value, expires_at }
    }

    /// Expired once the current time reaches the expiration time.
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    /// Remaining TTL in whole seconds, rounded up like the store does.
    fn ttl_remaining(&self) -> Option<u64> {
        self.expires_at.map(|expires| {
            let now = current_timestamp_ms();
            if expires > now {
                (expires - now).div_ceil(1000)
            } else {
                0
            }
        })
    }

    fn size(&self, key: &str) -> u64 {
        let value = match &self.value {
            StoredValue::Bytes(bytes) => bytes.len() as u64,
            StoredValue::List(items) => items
                .iter()
                .map(|item| item.len() as u64 + LIST_NODE_OVERHEAD)
                .sum(),
        };
        key.len() as u64 + value + ENTRY_OVERHEAD
    }

    fn kind(&self) -> KeyType {
        match self.value {
            StoredValue::Bytes(_) => KeyType::String,
            StoredValue::List(_) => KeyType::List,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, StoredEntry>,
    used: u64,
    peak: u64,
    /// Cursor id -> last key returned, so deletes during a scan skip nothing
    cursors: HashMap<u64, String>,
    next_cursor: u64,
}

impl Inner {
    /// Returns the live entry for `key`, dropping it first if it expired.
    fn live(&mut self, key: &str) -> Option<&mut StoredEntry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired()) {
            self.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: String, entry: StoredEntry) {
        let added = entry.size(&key);
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.used = self.used.saturating_sub(old.size(&key));
        }
        self.used += added;
        self.peak = self.peak.max(self.used);
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.used = self.used.saturating_sub(old.size(key));
                true
            }
            None => false,
        }
    }

    /// Recomputes tracked usage for `key` after an in-place mutation.
    fn resize(&mut self, key: &str, before: u64) {
        if let Some(entry) = self.entries.get(key) {
            let after = entry.size(key);
            self.used = self.used.saturating_sub(before) + after;
            self.peak = self.peak.max(self.used);
        }
    }
}

// == Memory Store ==
/// In-process store implementing the full command interface.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// When false every command fails with `StoreUnavailable`
    unavailable: AtomicBool,
    /// Reported as `maxmemory`, zero = unbounded
    maxmemory: AtomicU64,
    /// When set, MEMORY USAGE replies with None
    memory_usage_disabled: AtomicBool,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that reports `bytes` as its hard memory limit.
    pub fn with_max_memory(bytes: u64) -> Self {
        let store = Self::new();
        store.set_max_memory(bytes);
        store
    }

    pub fn set_max_memory(&self, bytes: u64) {
        self.maxmemory.store(bytes, Ordering::Relaxed);
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    /// Simulates a server without the MEMORY USAGE command.
    pub fn disable_memory_usage(&self) {
        self.memory_usage_disabled.store(true, Ordering::Relaxed);
    }

    /// Plain SET: stores `value` without an expiry.
    pub async fn set_persistent(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check()?;
        let entry = StoredEntry::new(StoredValue::Bytes(value.to_vec()), None);
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    /// Removes all expired entries, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(CacheError::StoreUnavailable(
                "connection refused (simulated)".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::InvalidRequest(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.live(key) {
            Some(entry) => match &entry.value {
                StoredValue::Bytes(bytes) => Ok(Some(bytes.clone())),
                StoredValue::List(_) => Err(wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        self.check()?;
        if ttl_secs == 0 {
            return Err(CacheError::InvalidRequest(
                "invalid expire time in 'setex' command".to_string(),
            ));
        }
        let entry = StoredEntry::new(StoredValue::Bytes(value.to_vec()), Some(ttl_secs));
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            if inner.live(key).is_some() && inner.remove(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let count = count.max(1);

        let resume_after = match cursor {
            0 => None,
            id => match inner.cursors.remove(&id) {
                Some(last) => Some(last),
                None => {
                    return Err(CacheError::InvalidRequest(format!(
                        "invalid cursor {}",
                        id
                    )))
                }
            },
        };
        let lower = match &resume_after {
            Some(last) => Bound::Excluded(last.as_str()),
            None => Bound::Unbounded,
        };

        let visited: Vec<(String, bool)> = inner
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take(count)
            .map(|(key, entry)| {
                let keep = !entry.is_expired() && glob_match(pattern, key);
                (key.clone(), keep)
            })
            .collect();

        let cursor = match visited.last() {
            Some((last, _)) if visited.len() == count => {
                if inner.cursors.len() >= MAX_OPEN_CURSORS {
                    // ids only grow, so the smallest is the oldest
                    if let Some(oldest) = inner.cursors.keys().min().copied() {
                        inner.cursors.remove(&oldest);
                    }
                }
                inner.next_cursor += 1;
                let id = inner.next_cursor;
                inner.cursors.insert(id, last.clone());
                id
            }
            _ => 0,
        };

        let keys = visited
            .into_iter()
            .filter_map(|(key, keep)| keep.then_some(key))
            .collect();
        Ok(ScanPage { cursor, keys })
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check()?;
        let mut inner = self.inner.write().await;
        Ok(match inner.live(key) {
            None => KeyTtl::Missing,
            Some(entry) => match entry.ttl_remaining() {
                Some(secs) => KeyTtl::Expires(secs),
                None => KeyTtl::Persistent,
            },
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if ttl_secs == 0 {
            return Ok(inner.live(key).is_some() && inner.remove(key));
        }
        match inner.live(key) {
            Some(entry) => {
                entry.expires_at = Some(current_timestamp_ms() + ttl_secs * 1000);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn key_type(&self, key: &str) -> Result<KeyType> {
        self.check()?;
        let mut inner = self.inner.write().await;
        Ok(inner.live(key).map(|e| e.kind()).unwrap_or(KeyType::None))
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        self.check()?;
        if self.memory_usage_disabled.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let mut inner = self.inner.write().await;
        Ok(inner.live(key).map(|entry| entry.size(key)))
    }

    async fn length(&self, key: &str, kind: KeyType) -> Result<Option<u64>> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.live(key) else {
            return Ok(Some(0));
        };
        match (&entry.value, kind) {
            (StoredValue::Bytes(bytes), KeyType::String) => Ok(Some(bytes.len() as u64)),
            (StoredValue::List(items), KeyType::List) => Ok(Some(items.len() as u64)),
            (_, KeyType::Hash | KeyType::Set | KeyType::ZSet | KeyType::Other | KeyType::None) => {
                Ok(None)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> Result<u64> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let before = match inner.live(key) {
            Some(entry) => entry.size(key),
            None => {
                let list = StoredEntry::new(StoredValue::List(VecDeque::new()), None);
                inner.insert(key.to_string(), list);
                0
            }
        };
        let len = match inner.entries.get_mut(key).map(|e| &mut e.value) {
            Some(StoredValue::List(items)) => {
                items.push_front(value.to_vec());
                items.len() as u64
            }
            _ => return Err(wrong_type(key)),
        };
        inner.resize(key, before);
        Ok(len)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.live(key) else {
            return Ok(());
        };
        let before = entry.size(key);
        let StoredValue::List(items) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        let len = items.len() as i64;
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
        let (start, stop) = (norm(start), norm(stop).min(len - 1));
        if start > stop || start >= len {
            inner.remove(key);
            return Ok(());
        }
        items.truncate(stop as usize + 1);
        items.drain(..start as usize);
        inner.resize(key, before);
        Ok(())
    }

    async fn info(&self) -> Result<ServerInfo> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(ServerInfo {
            used_memory: inner.used,
            used_memory_peak: inner.peak,
            maxmemory: self.maxmemory.load(Ordering::Relaxed),
            used_memory_rss: inner.used,
            connected_clients: 1,
            total_keys: inner.entries.len() as u64,
            evicted_keys: 0,
            expired_keys: 0,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
