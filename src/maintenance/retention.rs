//! Retention Enforcer
//!
//! Bounds non-cache key families: assigns the policy TTL to keys that have
//! none and trims oversized lists to their newest entries.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetentionPolicy;
use crate::error::{CacheError, Result};
use crate::kv::{KeyTtl, KeyType, KvStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub pattern: String,
    pub scanned: usize,
    /// Keys that had no expiry and received the policy TTL
    pub expiry_set: usize,
    /// Lists trimmed to the policy length
    pub trimmed: usize,
    pub complete: bool,
}

pub struct RetentionEnforcer {
    kv: Arc<dyn KvStore>,
    policies: Vec<RetentionPolicy>,
    batch: usize,
}

impl RetentionEnforcer {
    pub fn new(kv: Arc<dyn KvStore>, policies: Vec<RetentionPolicy>, batch: usize) -> Self {
        Self {
            kv,
            policies,
            batch: batch.max(1),
        }
    }

    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// Sweeps every policy. A failing policy stops at its cursor and the
    /// remaining policies still run.
    pub async fn enforce(&self) -> Vec<RetentionReport> {
        let mut reports = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            let mut report = RetentionReport {
                pattern: policy.pattern.clone(),
                ..RetentionReport::default()
            };
            match self.sweep(policy, &mut report).await {
                Ok(()) => report.complete = true,
                Err(e) => {
                    warn!(pattern = %policy.pattern, error = %e, "retention sweep stopped early")
                }
            }
            if report.expiry_set > 0 || report.trimmed > 0 {
                info!(
                    pattern = %policy.pattern,
                    expiry_set = report.expiry_set,
                    trimmed = report.trimmed,
                    "retention enforced"
                );
            }
            reports.push(report);
        }
        reports
    }

    async fn sweep(&self, policy: &RetentionPolicy, report: &mut RetentionReport) -> Result<()> {
        let mut cursor = 0u64;
        loop {
            let page = self
                .kv
                .scan(cursor, &policy.pattern, self.batch)
                .await
                .map_err(|e| partial(cursor, report, e))?;

            for key in &page.keys {
                report.scanned += 1;
                self.enforce_key(policy, key, report)
                    .await
                    .map_err(|e| partial(cursor, report, e))?;
            }

            cursor = page.cursor;
            if cursor == 0 {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    async fn enforce_key(
        &self,
        policy: &RetentionPolicy,
        key: &str,
        report: &mut RetentionReport,
    ) -> Result<()> {
        if self.kv.ttl(key).await? == KeyTtl::Persistent
            && self.kv.expire(key, policy.ttl_secs).await?
        {
            report.expiry_set += 1;
        }

        let Some(max) = policy.max_list_length else {
            return Ok(());
        };
        if self.kv.key_type(key).await? != KeyType::List {
            return Ok(());
        }
        let len = self.kv.length(key, KeyType::List).await?.unwrap_or(0);
        if len <= max as u64 {
            return Ok(());
        }
        if max == 0 {
            // LTRIM 0 -1 would keep everything
            if self.kv.del(&[key.to_string()]).await? > 0 {
                report.trimmed += 1;
            }
        } else {
            // newest entries sit at the head
            self.kv.ltrim(key, 0, max as i64 - 1).await?;
            report.trimmed += 1;
        }
        Ok(())
    }
}

fn partial(cursor: u64, report: &RetentionReport, cause: CacheError) -> CacheError {
    CacheError::PartialScan {
        cursor,
        completed: report.expiry_set + report.trimmed,
        reason: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kv::MemoryStore;

    fn enforcer(kv: Arc<MemoryStore>) -> RetentionEnforcer {
        RetentionEnforcer::new(kv, Config::default().retention, 2)
    }

    #[tokio::test]
    async fn test_persistent_keys_get_policy_ttl() {
        let kv = Arc::new(MemoryStore::new());
        kv.set_persistent("blacklist:token:abc", b"1").await.unwrap();
        kv.set_persistent("audit:42", b"login").await.unwrap();
        kv.set_ex("ratelimit:ip:1", b"3", 10).await.unwrap();

        let reports = enforcer(kv.clone()).enforce().await;

        assert_eq!(kv.ttl("blacklist:token:abc").await.unwrap(), KeyTtl::Expires(86400));
        assert_eq!(kv.ttl("audit:42").await.unwrap(), KeyTtl::Expires(90 * 86400));
        // existing expiry untouched
        assert!(kv.ttl("ratelimit:ip:1").await.unwrap().remaining().unwrap() <= 10);
        assert!(reports.iter().all(|r| r.complete));
        assert_eq!(reports.iter().map(|r| r.expiry_set).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn test_long_lists_keep_newest() {
        let kv = Arc::new(MemoryStore::new());
        let policy =
            RetentionPolicy::new("events:ip:*", 3600, "ip events").with_max_list_length(3);
        for i in 0..6 {
            kv.lpush("events:ip:1.2.3.4", format!("e{}", i).as_bytes()).await.unwrap();
        }
        kv.lpush("events:ip:5.6.7.8", b"only").await.unwrap();

        let enforcer = RetentionEnforcer::new(kv.clone(), vec![policy], 10);
        let reports = enforcer.enforce().await;

        assert_eq!(reports[0].trimmed, 1);
        assert_eq!(reports[0].expiry_set, 2);
        assert_eq!(kv.length("events:ip:1.2.3.4", KeyType::List).await.unwrap(), Some(3));
        assert_eq!(kv.length("events:ip:5.6.7.8", KeyType::List).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_zero_list_length_empties_list() {
        let kv = Arc::new(MemoryStore::new());
        let policy =
            RetentionPolicy::new("events:ip:*", 3600, "ip events").with_max_list_length(0);
        for i in 0..5 {
            kv.lpush("events:ip:1", format!("e{}", i).as_bytes()).await.unwrap();
        }

        let reports = RetentionEnforcer::new(kv.clone(), vec![policy], 10).enforce().await;

        assert_eq!(reports[0].trimmed, 1);
        assert_eq!(kv.key_type("events:ip:1").await.unwrap(), KeyType::None);
    }

    #[tokio::test]
    async fn test_non_matching_keys_untouched() {
        let kv = Arc::new(MemoryStore::new());
        kv.set_persistent("session:1", b"s").await.unwrap();
        enforcer(kv.clone()).enforce().await;
        assert_eq!(kv.ttl("session:1").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_incomplete() {
        let kv = Arc::new(MemoryStore::new());
        kv.set_available(false);
        let reports = enforcer(kv).enforce().await;
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|r| !r.complete));
    }
}
