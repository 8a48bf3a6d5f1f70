//! Background cache maintenance
//!
//! Periodically sweeps expired entries out of a [`CacheStore`] and keeps
//! running counters alongside the store's own statistics.

use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

use crate::cache::{CacheStats, CacheStore};
use crate::task::ScheduledTask;

/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct SweepMetrics {
    sweeps: AtomicU64,
    evicted: AtomicU64,
}

/// Counters since the maintainer was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepCounters {
    pub sweeps: u64,
    pub evicted: u64,
}

/// Maintainer counters plus a snapshot of the store
#[derive(Debug, Clone, Serialize)]
pub struct MaintainerStats {
    pub running: bool,
    pub interval_ms: u64,
    #[serde(flatten)]
    pub counters: SweepCounters,
    pub cache: CacheStats,
}

pub struct BackgroundMaintainer {
    cache: Arc<CacheStore>,
    interval: Duration,
    metrics: Arc<SweepMetrics>,
    task: ScheduledTask,
}

impl BackgroundMaintainer {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self::with_interval(cache, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_interval(cache: Arc<CacheStore>, every: Duration) -> Self {
        Self {
            cache,
            interval: every.max(Duration::from_millis(1)),
            metrics: Arc::new(SweepMetrics::default()),
            task: ScheduledTask::new("cache maintainer"),
        }
    }

    /// Start sweeping every `interval`; restarting replaces the running loop.
    ///
    /// The first sweep runs one interval after starting.
    pub fn start(&self) -> bool {
        let cache = Arc::clone(&self.cache);
        let metrics = Arc::clone(&self.metrics);
        let every = self.interval;

        self.task.arm(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&cache, &metrics);
            }
        })
    }

    pub fn stop(&self) {
        self.task.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.is_pending()
    }

    /// Sweep once, right now; returns the number of entries removed
    pub fn sweep_now(&self) -> usize {
        sweep(&self.cache, &self.metrics)
    }

    pub fn counters(&self) -> SweepCounters {
        SweepCounters {
            sweeps: self.metrics.sweeps.load(Ordering::Relaxed),
            evicted: self.metrics.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> MaintainerStats {
        MaintainerStats {
            running: self.is_running(),
            interval_ms: u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            counters: self.counters(),
            cache: self.cache.stats(),
        }
    }
}

fn sweep(cache: &CacheStore, metrics: &SweepMetrics) -> usize {
    let removed = cache.cleanup();
    metrics.sweeps.fetch_add(1, Ordering::Relaxed);
    metrics.evicted.fetch_add(removed as u64, Ordering::Relaxed);

    if removed > 0 {
        info!("Cache sweep removed {} expired entries", removed);
    } else {
        debug!("Cache sweep found nothing to remove");
    }
    removed
}
