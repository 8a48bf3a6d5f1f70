//! Per-resource data controller
//!
//! Composes the shared [`CacheStore`] with an [`UpdateGate`]: it serves
//! cached data or fetches on mount, busts the cache when its dependencies
//! change, flags data stale once it outlives its freshness window, and lets
//! environment signals trigger throttled background refreshes.

pub mod fetcher;
pub mod state;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::cache::{CacheStore, CacheTtl};
use crate::clock::{self, SharedClock, elapsed};
use crate::error::{Error, Result};
use crate::gate::{GateConfig, SignalHub, UpdateGate, UpdateOutcome};
use crate::task::ScheduledTask;

pub use fetcher::Fetcher;
pub use state::ResourceState;

/// Delay before a background pre-fetch starts
pub const PREFETCH_DELAY: Duration = Duration::from_millis(100);

/// How one `load` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A valid cache entry was adopted without fetching
    CacheHit,
    /// Fetched and written through to the cache
    Fetched,
    /// Fetch failed; the configured fallback is shown, flagged stale
    Fallback,
    /// Fetch failed with no fallback; the error is in the state
    Failed,
    /// Another load was already running; nothing was done
    InFlight,
    /// A newer load cycle took over; this result was discarded
    Superseded,
}

/// Load-path guard: whether a fetch is running and which cycle owns it
#[derive(Debug, Default)]
struct LoadSlot {
    epoch: u64,
    in_flight: bool,
}

/// Controller for one logical cache key. Clones share the same controller.
pub struct DataController<T> {
    inner: Arc<ControllerInner<T>>,
}

impl<T> Clone for DataController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<T> {
    key: String,
    fetcher: Arc<dyn Fetcher<T>>,
    cache: Arc<CacheStore>,
    ttl: Duration,
    stale_after: Duration,
    passive_interval: Duration,
    prefetch_delay: Option<Duration>,
    fallback: Option<T>,
    clock: SharedClock,
    state: Mutex<ResourceState<T>>,
    slot: Mutex<LoadSlot>,
    dependencies: Mutex<Option<u64>>,
    gate: UpdateGate,
    stale_timer: ScheduledTask,
    prefetch_task: ScheduledTask,
}

impl<T> ControllerInner<T> {
    /// Freshness predicate handed to the gate
    fn needs_refresh(&self) -> bool {
        let now = self.clock.now();
        lock(&self.state)
            .last_updated
            .is_none_or(|at| elapsed(now, at) > self.passive_interval)
    }
}

/// Releases the load slot if the fetch future is dropped before settling,
/// so an aborted load never leaves `loading` stuck at true.
struct InFlightGuard<'a, T> {
    inner: &'a ControllerInner<T>,
    epoch: u64,
    settled: bool,
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut slot = lock(&self.inner.slot);
        if slot.epoch == self.epoch {
            slot.in_flight = false;
            lock(&self.inner.state).loading = false;
        }
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn fingerprint<D: Hash + ?Sized>(dependencies: &D) -> u64 {
    let mut hasher = DefaultHasher::new();
    dependencies.hash(&mut hasher);
    hasher.finish()
}

impl<T> DataController<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start building a controller for cache key `key`
    pub fn builder<F>(key: impl Into<String>, fetcher: F) -> ControllerBuilder<T>
    where
        F: Fetcher<T> + 'static,
    {
        ControllerBuilder::new(key.into(), Arc::new(fetcher))
    }

    /// Initial load: serve from cache or fetch, warming in the background
    /// first if pre-fetch is enabled.
    pub async fn mount(&self) -> LoadOutcome {
        self.schedule_prefetch();
        self.load(false).await
    }

    /// Serve a valid cache entry, or fetch when forced or on a miss.
    ///
    /// Overlapping calls collapse: while a load is running, further calls
    /// return [`LoadOutcome::InFlight`] without fetching.
    pub async fn load(&self, force_refresh: bool) -> LoadOutcome {
        let inner = &self.inner;
        let epoch = {
            let mut slot = lock(&inner.slot);
            if slot.in_flight {
                debug!("Load of {} already in flight", inner.key);
                return LoadOutcome::InFlight;
            }

            if !force_refresh && let Some(value) = inner.cache.get::<T>(&inner.key) {
                let now = inner.clock.now();
                {
                    let mut state = lock(&inner.state);
                    state.data = Some(value);
                    state.loading = false;
                    state.error = None;
                    state.last_updated = Some(now);
                    state.is_stale = false;
                }
                drop(slot);
                self.arm_stale_timer(now);
                return LoadOutcome::CacheHit;
            }

            slot.epoch += 1;
            slot.in_flight = true;
            slot.epoch
        };

        self.run_fetch(epoch).await
    }

    /// Fetch regardless of the cache
    pub async fn refetch(&self) -> LoadOutcome {
        self.load(true).await
    }

    /// Drop the cache entry; the visible state is left alone
    pub fn invalidate(&self) {
        debug!("Invalidating {}", self.inner.key);
        self.inner.cache.invalidate(&self.inner.key);
    }

    pub async fn invalidate_and_reload(&self) -> LoadOutcome {
        self.invalidate();
        self.load(true).await
    }

    /// Report the current dependencies.
    ///
    /// When they differ from the previous ones the cache entry is
    /// invalidated and exactly one fetch runs, taking over from any load
    /// still in flight (whose result is then discarded). Returns `None` when
    /// nothing changed or no dependencies were known before.
    pub async fn set_dependencies<D: Hash + ?Sized>(&self, dependencies: &D) -> Option<LoadOutcome> {
        let next = fingerprint(dependencies);
        let previous = lock(&self.inner.dependencies).replace(next);
        match previous {
            Some(previous) if previous != next => {}
            _ => return None,
        }

        debug!("Dependencies of {} changed, reloading", self.inner.key);
        self.invalidate();
        let epoch = {
            let mut slot = lock(&self.inner.slot);
            slot.epoch += 1;
            slot.in_flight = true;
            slot.epoch
        };
        Some(self.run_fetch(epoch).await)
    }

    /// Explicit refresh through the gate, bypassing its minimum interval
    pub async fn force_update(&self) -> UpdateOutcome {
        self.inner.gate.force_update().await
    }

    /// Let visibility and focus changes from `hub` trigger passive refreshes
    pub fn attach_signals(&self, hub: &SignalHub) {
        self.inner.gate.attach(hub);
    }

    /// Arm the background warm-up if enabled and nothing is held yet
    pub fn schedule_prefetch(&self) -> bool {
        let Some(delay) = self.inner.prefetch_delay else {
            return false;
        };
        if lock(&self.inner.state).data.is_some() {
            return false;
        }

        let controller = Arc::downgrade(&self.inner);
        self.inner.prefetch_task.arm(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = controller.upgrade() {
                DataController { inner }.prefetch().await;
            }
        })
    }

    /// Snapshot of the visible state; staleness also follows the clock.
    pub fn state(&self) -> ResourceState<T> {
        let now = self.inner.clock.now();
        let mut snapshot = lock(&self.inner.state).clone();
        if let Some(at) = snapshot.last_updated
            && elapsed(now, at) > self.inner.stale_after
        {
            snapshot.is_stale = true;
        }
        snapshot
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn gate(&self) -> &UpdateGate {
        &self.inner.gate
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.slot).in_flight
    }

    /// Cancel every timer and listener owned by this controller
    pub fn shutdown(&self) {
        self.inner.gate.shutdown();
        self.inner.stale_timer.cancel();
        self.inner.prefetch_task.cancel();
    }

    async fn run_fetch(&self, epoch: u64) -> LoadOutcome {
        let inner = &*self.inner;
        {
            let mut state = lock(&inner.state);
            state.loading = true;
            state.error = None;
        }

        let mut guard = InFlightGuard {
            inner,
            epoch,
            settled: false,
        };
        let result = inner.fetcher.fetch().await;
        guard.settled = true;

        self.settle(epoch, result)
    }

    fn settle(&self, epoch: u64, result: Result<T>) -> LoadOutcome {
        let inner = &self.inner;
        let mut slot = lock(&inner.slot);
        if slot.epoch != epoch {
            debug!("Discarding superseded result for {}", inner.key);
            return LoadOutcome::Superseded;
        }
        slot.in_flight = false;

        let now = inner.clock.now();
        let mut state = lock(&inner.state);
        state.loading = false;

        match result {
            Ok(value) => {
                inner.cache.set_with_ttl(&inner.key, &value, inner.ttl);
                state.data = Some(value);
                state.error = None;
                state.last_updated = Some(now);
                state.is_stale = false;
                drop(state);
                drop(slot);
                self.arm_stale_timer(now);
                LoadOutcome::Fetched
            }
            Err(e) => match &inner.fallback {
                Some(fallback) => {
                    debug!("Fetch of {} failed, using fallback: {}", inner.key, e);
                    state.data = Some(fallback.clone());
                    state.error = None;
                    state.is_stale = true;
                    LoadOutcome::Fallback
                }
                None => {
                    debug!("Fetch of {} failed: {}", inner.key, e);
                    state.error = Some(Arc::new(e));
                    LoadOutcome::Failed
                }
            },
        }
    }

    /// Flip `is_stale` once data loaded at `loaded_at` outlives its window
    fn arm_stale_timer(&self, loaded_at: DateTime<Utc>) {
        let after = self.inner.stale_after;
        let controller = Arc::downgrade(&self.inner);
        self.inner.stale_timer.arm(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = controller.upgrade() {
                let mut state = lock(&inner.state);
                if state.last_updated == Some(loaded_at) {
                    debug!("{} is now stale", inner.key);
                    state.is_stale = true;
                }
            }
        });
    }

    /// Silent warm-up: writes through to the cache only, never touches the
    /// visible state, and logs failures instead of surfacing them.
    async fn prefetch(&self) {
        let inner = &self.inner;
        let busy = lock(&inner.slot).in_flight;
        let has_data = lock(&inner.state).data.is_some();
        if busy || has_data {
            return;
        }

        match inner.fetcher.fetch().await {
            Ok(value) => {
                debug!("Prefetched {}", inner.key);
                inner.cache.set_with_ttl(&inner.key, &value, inner.ttl);
            }
            Err(e) => warn!("Background prefetch of {} failed: {}", inner.key, e),
        }
    }

    /// Update function run by the gate
    async fn passive_refresh(&self) -> Result<()> {
        match self.load(true).await {
            LoadOutcome::Fetched | LoadOutcome::CacheHit => Ok(()),
            outcome => Err(Error::Other(format!(
                "passive refresh of {} ended as {:?}",
                self.inner.key, outcome
            ))),
        }
    }
}

/// Builder for [`DataController`]
pub struct ControllerBuilder<T> {
    key: String,
    fetcher: Arc<dyn Fetcher<T>>,
    cache: Option<Arc<CacheStore>>,
    ttl: Duration,
    stale_after: Option<Duration>,
    passive_interval: Option<Duration>,
    prefetch_delay: Option<Duration>,
    fallback: Option<T>,
    gate_config: GateConfig,
    clock: Option<SharedClock>,
    dependencies: Option<u64>,
}

impl<T> ControllerBuilder<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn new(key: String, fetcher: Arc<dyn Fetcher<T>>) -> Self {
        Self {
            key,
            fetcher,
            cache: None,
            ttl: CacheTtl::DEFAULT,
            stale_after: None,
            passive_interval: None,
            prefetch_delay: None,
            fallback: None,
            gate_config: GateConfig::default(),
            clock: None,
            dependencies: None,
        }
    }

    /// Store to read and write through; defaults to [`CacheStore::shared`]
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// TTL of the entries this controller writes
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Advisory freshness window; defaults to the TTL
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Minimum data age before a passive refresh is worthwhile; defaults to
    /// the gate's minimum interval
    pub fn passive_interval(mut self, interval: Duration) -> Self {
        self.passive_interval = Some(interval);
        self
    }

    /// Shown (flagged stale) when a fetch fails
    pub fn fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Enable the background warm-up with the default delay
    pub fn prefetch(self, enabled: bool) -> Self {
        self.prefetch_after(enabled.then_some(PREFETCH_DELAY))
    }

    pub fn prefetch_after(mut self, delay: Option<Duration>) -> Self {
        self.prefetch_delay = delay;
        self
    }

    pub fn gate_config(mut self, config: GateConfig) -> Self {
        self.gate_config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Initial dependencies; later changes go through `set_dependencies`
    pub fn dependencies<D: Hash + ?Sized>(mut self, dependencies: &D) -> Self {
        self.dependencies = Some(fingerprint(dependencies));
        self
    }

    pub fn build(self) -> DataController<T> {
        let clock = self.clock.unwrap_or_else(clock::system);
        let passive_interval = self
            .passive_interval
            .unwrap_or(self.gate_config.min_interval);
        let gate_config = self.gate_config;
        let gate_clock = clock.clone();

        let inner = Arc::new_cyclic(|controller: &Weak<ControllerInner<T>>| {
            let for_update = controller.clone();
            let for_check = controller.clone();
            let gate = UpdateGate::builder(move || {
                let controller = for_update.clone();
                async move {
                    let inner = controller
                        .upgrade()
                        .ok_or_else(|| Error::Other("controller dropped".to_string()))?;
                    DataController { inner }.passive_refresh().await
                }
            })
            .should_update(move || {
                for_check
                    .upgrade()
                    .is_some_and(|inner| inner.needs_refresh())
            })
            .config(gate_config)
            .clock(gate_clock)
            .build();

            ControllerInner {
                key: self.key,
                fetcher: self.fetcher,
                cache: self.cache.unwrap_or_else(CacheStore::shared),
                ttl: self.ttl,
                stale_after: self.stale_after.unwrap_or(self.ttl),
                passive_interval,
                prefetch_delay: self.prefetch_delay,
                fallback: self.fallback,
                clock,
                state: Mutex::new(ResourceState::pending()),
                slot: Mutex::new(LoadSlot::default()),
                dependencies: Mutex::new(self.dependencies),
                gate,
                stale_timer: ScheduledTask::new("staleness timer"),
                prefetch_task: ScheduledTask::new("prefetch"),
            }
        });

        DataController { inner }
    }
}
