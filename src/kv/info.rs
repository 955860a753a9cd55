//! Parsing of the store's INFO reply.

use std::collections::HashMap;

use serde::Serialize;

/// Server-level memory and client figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    pub used_memory: u64,
    pub used_memory_peak: u64,
    /// Zero when no hard limit is configured
    pub maxmemory: u64,
    pub used_memory_rss: u64,
    pub connected_clients: u64,
    /// Keys across all databases
    pub total_keys: u64,
    pub evicted_keys: u64,
    pub expired_keys: u64,
}

impl ServerInfo {
    /// Parses `INFO` text: `# Section` headers and `field:value` lines.
    ///
    /// Unknown fields are ignored and missing ones stay zero. Keyspace lines
    /// (`db0:keys=12,expires=3,avg_ttl=0`) are summed into `total_keys`.
    pub fn parse(raw: &str) -> Self {
        let fields: HashMap<&str, &str> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .collect();

        let num = |name: &str| -> u64 {
            fields
                .get(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0)
        };

        let total_keys = fields
            .iter()
            .filter(|(name, _)| is_db_field(name))
            .filter_map(|(_, value)| {
                value
                    .split(',')
                    .find_map(|part| part.strip_prefix("keys="))
                    .and_then(|n| n.parse::<u64>().ok())
            })
            .sum();

        Self {
            used_memory: num("used_memory"),
            used_memory_peak: num("used_memory_peak"),
            maxmemory: num("maxmemory"),
            used_memory_rss: num("used_memory_rss"),
            connected_clients: num("connected_clients"),
            total_keys,
            evicted_keys: num("evicted_keys"),
            expired_keys: num("expired_keys"),
        }
    }
}

fn is_db_field(name: &str) -> bool {
    name.strip_prefix("db")
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
