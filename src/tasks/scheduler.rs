//! Periodic Job Scheduler
//!
//! Each job runs on its own interval in its own task. Cancelling the shared
//! token stops every job; a sweep in flight is dropped at its next await.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::cleanup::spawn_cleanup_task;
use crate::engine::Engine;

/// Handles of the running jobs.
pub struct Scheduler {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts every job with a non-zero interval.
    pub fn start(engine: Arc<Engine>, token: CancellationToken) -> Self {
        let schedule = engine.config.schedule.clone();
        let mut handles = Vec::new();

        let e = engine.clone();
        let log_stats = move || {
            let e = e.clone();
            async move {
                let m = e.cache.metrics().snapshot();
                info!(
                    hits = m.hits,
                    misses = m.misses,
                    sets = m.sets,
                    invalidations = m.invalidations,
                    errors = m.errors,
                    evictions = m.evictions,
                    hit_rate = m.hit_rate,
                    "cache stats"
                );
            }
        };
        handles.extend(spawn_periodic(
            "stats",
            schedule.stats_interval_secs,
            false,
            &token,
            log_stats,
        ));

        let e = engine.clone();
        let sample = move || {
            let e = e.clone();
            async move {
                e.sample_memory().await;
            }
        };
        handles.extend(spawn_periodic(
            "sample",
            schedule.sample_interval_secs,
            true,
            &token,
            sample,
        ));

        let e = engine.clone();
        let retention = move || {
            let e = e.clone();
            async move {
                e.retention.enforce().await;
            }
        };
        handles.extend(spawn_periodic(
            "retention",
            schedule.retention_interval_secs,
            false,
            &token,
            retention,
        ));

        let e = engine.clone();
        let optimize = move || {
            let e = e.clone();
            async move {
                e.enforcer.optimize().await;
            }
        };
        handles.extend(spawn_periodic(
            "optimize",
            schedule.optimize_interval_secs,
            false,
            &token,
            optimize,
        ));

        if let Some(source) = engine.preload_source().map(Arc::new) {
            let e = engine.clone();
            let preload = move || {
                let e = e.clone();
                let source = source.clone();
                async move {
                    e.preloader.preload(source.as_ref()).await;
                }
            };
            handles.extend(spawn_periodic(
                "preload",
                schedule.preload_interval_secs,
                true,
                &token,
                preload,
            ));
        }

        if let Some(store) = engine
            .memory_store()
            .filter(|_| schedule.cleanup_interval_secs > 0)
        {
            handles.push(spawn_cleanup_task(
                store.clone(),
                schedule.cleanup_interval_secs,
                token.clone(),
            ));
        }

        info!(jobs = handles.len(), "scheduler started");
        Self { token, handles }
    }

    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    /// Cancels every job and waits for them to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

/// Runs `job` every `every_secs` seconds until `token` is cancelled. Returns
/// None when the interval is zero (job disabled). With `immediate`, the
/// first run happens at once instead of after one interval.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    every_secs: u64,
    immediate: bool,
    token: &CancellationToken,
    job: F,
) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if every_secs == 0 {
        debug!(job = name, "job disabled");
        return None;
    }
    let period = Duration::from_secs(every_secs);
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let token = token.clone();

    Some(tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            debug!(job = name, "job running");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = job() => {}
            }
        }
        debug!(job = name, "job stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kv::{KvStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_job_runs_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = runs.clone();
        let handle = spawn_periodic("count", 1, true, &token, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        token.cancel();
        handle.await.unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "ran {} times", seen);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_zero_interval_disables_job() {
        let token = CancellationToken::new();
        assert!(spawn_periodic("off", 0, true, &token, || async {}).is_none());
    }

    #[tokio::test]
    async fn test_scheduler_samples_and_stops() {
        let mut config = Config::default();
        config.schedule.sample_interval_secs = 1;
        let store = Arc::new(MemoryStore::with_max_memory(1 << 20));
        store.set_ex("cache:user:1", b"{}", 60).await.unwrap();
        let engine = Arc::new(Engine::with_memory_store(config, store));

        let scheduler = Scheduler::start(engine.clone(), CancellationToken::new());
        // stats, sample, retention, optimize, cleanup
        assert_eq!(scheduler.job_count(), 5);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.monitor.latest().is_some());

        tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown())
            .await
            .expect("jobs should stop promptly");
    }
}
