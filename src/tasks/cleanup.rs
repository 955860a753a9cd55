//! TTL Cleanup Task
//!
//! Purges expired entries from the in-process store. Redis expires keys on
//! its own, so this task only runs on the memory backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::kv::MemoryStore;

/// Spawns a task that purges expired entries every `cleanup_interval_secs`
/// until `token` is cancelled.
pub fn spawn_cleanup_task(
    store: Arc<MemoryStore>,
    cleanup_interval_secs: u64,
    token: CancellationToken,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = cleanup_interval_secs, "ttl cleanup task started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = store.cleanup_expired().await;
            if removed > 0 {
                info!(removed, "ttl cleanup removed expired entries");
            } else {
                debug!("ttl cleanup found no expired entries");
            }
        }
        debug!("ttl cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("expire_soon", b"value", 1).await.unwrap();
        store.set_ex("long_lived", b"value", 3600).await.unwrap();

        let token = CancellationToken::new();
        let handle = spawn_cleanup_task(store.clone(), 1, token.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(store.len().await, 1);
        assert!(store.get("long_lived").await.unwrap().is_some());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = spawn_cleanup_task(Arc::new(MemoryStore::new()), 60, token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop promptly")
            .unwrap();
    }
}
