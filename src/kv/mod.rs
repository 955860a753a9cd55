//! Key-Value Store Module
//!
//! The command interface the caching layer needs from its backing store, with
//! a Redis implementation and an in-process implementation of the same trait.

mod info;
mod memory;
mod pattern;
mod redis;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use self::info::ServerInfo;
pub use self::memory::MemoryStore;
pub use self::pattern::glob_match;
pub use self::redis::{redact_url, RedisStore};

// == Key TTL ==
/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Seconds until expiry
    Expires(u64),
}

impl KeyTtl {
    /// Maps the integer reply of the TTL command.
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Expires(r as u64),
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        match self {
            KeyTtl::Expires(secs) => Some(*secs),
            _ => None,
        }
    }
}

// == Key Type ==
/// Value type held by a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    None,
    String,
    List,
    Hash,
    Set,
    ZSet,
    Other,
}

impl KeyType {
    /// Maps the status reply of the TYPE command.
    pub fn from_reply(reply: &str) -> Self {
        match reply {
            "none" => KeyType::None,
            "string" => KeyType::String,
            "list" => KeyType::List,
            "hash" => KeyType::Hash,
            "set" => KeyType::Set,
            "zset" => KeyType::ZSet,
            _ => KeyType::Other,
        }
    }
}

// == Scan Page ==
/// One batch of a cursor scan. A `cursor` of zero means the scan is complete.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

// == Store Trait ==
/// Command interface of the remote key-value store.
///
/// Every method may fail with `StoreUnavailable` or `Timeout`; callers decide
/// whether that is fatal. Commands are atomic per key, nothing spans keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// GET
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// SETEX
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;

    /// DEL, returns the number of keys removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// SCAN cursor MATCH pattern COUNT count
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// TTL
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// EXPIRE, returns false if the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// TYPE
    async fn key_type(&self, key: &str) -> Result<KeyType>;

    /// MEMORY USAGE, None when the store does not support it
    async fn memory_usage(&self, key: &str) -> Result<Option<u64>>;

    /// STRLEN / LLEN / HLEN / SCARD / ZCARD depending on `kind`
    async fn length(&self, key: &str, kind: KeyType) -> Result<Option<u64>>;

    /// LPUSH, returns the new list length
    async fn lpush(&self, key: &str, value: &[u8]) -> Result<u64>;

    /// LTRIM
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// INFO memory + clients + keyspace
    async fn info(&self) -> Result<ServerInfo>;

    /// PING
    async fn ping(&self) -> Result<()>;
}
