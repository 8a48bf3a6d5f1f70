//! Passive-update gate
//!
//! Decides whether a background refresh may run now. The gate is either
//! Idle or Updating; at most one update runs per gate at a time, at most one
//! successful update is accepted per `min_interval`, and every environment
//! signal funnels through the same `can_update` / `perform_update` pair.

pub mod signals;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::clock::{self, SharedClock, elapsed};
use crate::error::Result;
use crate::task::ScheduledTask;

pub use signals::{ActivityKind, EnvSignal, Environment, SignalHub};

/// Asynchronous update run by the gate
pub type UpdateFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Caller-supplied "is an update worthwhile" predicate
pub type FreshnessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Gate timing and signal configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Minimum time between two accepted updates
    pub min_interval: Duration,
    /// Delay before updating after the page becomes visible
    pub visibility_delay: Duration,
    /// Delay before updating after the window regains focus
    pub focus_delay: Duration,
    /// Idle time required before a focus gain triggers an update
    pub inactivity_threshold: Duration,
    pub update_on_visibility: bool,
    pub update_on_focus: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            visibility_delay: Duration::from_millis(1000),
            focus_delay: Duration::from_millis(500),
            inactivity_threshold: Duration::from_secs(30),
            update_on_visibility: true,
            update_on_focus: true,
        }
    }
}

/// Snapshot of the gate's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateState {
    pub is_updating: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub is_visible: bool,
    pub is_focused: bool,
    /// Start of the current idle period; `None` until the first observation
    pub inactivity_start: Option<DateTime<Utc>>,
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            is_updating: false,
            last_update: None,
            is_visible: true,
            is_focused: true,
            inactivity_start: None,
        }
    }
}

/// Result of one `perform_update` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// `can_update` said no; the update function was not called
    Skipped,
    Completed,
    /// The update function failed; no timestamp was recorded
    Failed,
}

/// Throttled update trigger. Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct UpdateGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    config: GateConfig,
    clock: SharedClock,
    update: UpdateFn,
    should_update: Option<FreshnessCheck>,
    state: Mutex<GateState>,
    pending: ScheduledTask,
    listener: ScheduledTask,
}

/// Returns the gate to Idle however the update future ends, including
/// when the task driving it is aborted.
struct UpdatingGuard<'a> {
    state: &'a Mutex<GateState>,
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).is_updating = false;
    }
}

fn lock(state: &Mutex<GateState>) -> MutexGuard<'_, GateState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl UpdateGate {
    /// Start building a gate around an async update function
    pub fn builder<F, Fut>(update: F) -> GateBuilder
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        GateBuilder::new(Arc::new(move || update().boxed()))
    }

    /// Whether an update would be accepted right now. Side-effect free.
    pub fn can_update(&self) -> bool {
        let allowed = {
            let state = self.state();
            self.state_allows(&state, self.inner.clock.now())
        };
        allowed && self.freshness_allows()
    }

    /// Run the update function if `can_update` allows it.
    ///
    /// Failures are logged and swallowed; only success records `last_update`.
    pub async fn perform_update(&self) -> UpdateOutcome {
        if !self.freshness_allows() {
            debug!("Update skipped: data is still fresh");
            return UpdateOutcome::Skipped;
        }

        let guard = {
            let mut state = self.state();
            if !self.state_allows(&state, self.inner.clock.now()) {
                debug!("Update skipped: in flight or throttled");
                return UpdateOutcome::Skipped;
            }
            state.is_updating = true;
            UpdatingGuard {
                state: &self.inner.state,
            }
        };

        let result = (self.inner.update)().await;

        let outcome = match result {
            Ok(()) => {
                self.state().last_update = Some(self.inner.clock.now());
                UpdateOutcome::Completed
            }
            Err(e) => {
                warn!("Passive update failed: {}", e);
                UpdateOutcome::Failed
            }
        };
        drop(guard);
        outcome
    }

    /// Debounced trigger: replaces any pending scheduled update.
    ///
    /// When the delay elapses the update is re-validated and may still be
    /// declined. Once started, an update is not cancelled by a later schedule.
    pub fn schedule_update(&self, delay: Duration) -> bool {
        let gate = Arc::downgrade(&self.inner);
        self.inner.pending.arm(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = gate.upgrade() {
                let gate = UpdateGate { inner };
                tokio::spawn(async move {
                    gate.perform_update().await;
                });
            }
        })
    }

    /// Explicit refresh: forget the last update, then perform one.
    pub async fn force_update(&self) -> UpdateOutcome {
        self.state().last_update = None;
        self.perform_update().await
    }

    /// React to one environment signal; returns true if an update was scheduled.
    pub fn handle_signal(&self, signal: EnvSignal) -> bool {
        let config = &self.inner.config;
        let now = self.inner.clock.now();

        match signal {
            EnvSignal::Visibility(visible) => {
                {
                    let mut state = self.state();
                    state.is_visible = visible;
                    if !visible {
                        state.inactivity_start = Some(now);
                    }
                }
                if visible && config.update_on_visibility && self.can_update() {
                    debug!("Page visible, scheduling update");
                    return self.schedule_update(config.visibility_delay);
                }
                false
            }
            EnvSignal::Focus(focused) => {
                let idle = {
                    let mut state = self.state();
                    state.is_focused = focused;
                    let idle = state.inactivity_start.map(|start| elapsed(now, start));
                    if !focused {
                        state.inactivity_start = Some(now);
                    }
                    idle
                };
                let idle_long_enough =
                    idle.is_none_or(|idle| idle > config.inactivity_threshold);
                if focused && config.update_on_focus && idle_long_enough && self.can_update() {
                    debug!("Window focused after inactivity, scheduling update");
                    return self.schedule_update(config.focus_delay);
                }
                false
            }
            EnvSignal::Activity(_) => {
                self.state().inactivity_start = Some(now);
                false
            }
        }
    }

    /// Follow `hub`: adopt its current environment and handle every signal it emits.
    pub fn attach(&self, hub: &SignalHub) {
        let environment = hub.environment();
        {
            let mut state = self.state();
            state.is_visible = environment.visible;
            state.is_focused = environment.focused;
        }

        let mut rx = hub.subscribe();
        let gate = Arc::downgrade(&self.inner);
        self.inner.listener.arm(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        let Some(inner) = gate.upgrade() else {
                            break;
                        };
                        UpdateGate { inner }.handle_signal(signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Gate fell behind, skipped {} signals", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Cancel the pending scheduled update and stop following signals
    pub fn shutdown(&self) {
        self.inner.pending.cancel();
        self.inner.listener.cancel();
    }

    pub fn snapshot(&self) -> GateState {
        self.state().clone()
    }

    pub fn is_updating(&self) -> bool {
        self.state().is_updating
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state().last_update
    }

    pub fn has_pending_update(&self) -> bool {
        self.inner.pending.is_pending()
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        lock(&self.inner.state)
    }

    fn state_allows(&self, state: &GateState, now: DateTime<Utc>) -> bool {
        if state.is_updating {
            return false;
        }
        state
            .last_update
            .is_none_or(|last| elapsed(now, last) >= self.inner.config.min_interval)
    }

    fn freshness_allows(&self) -> bool {
        self.inner
            .should_update
            .as_ref()
            .is_none_or(|should_update| should_update())
    }
}

/// Builder for [`UpdateGate`]
pub struct GateBuilder {
    update: UpdateFn,
    config: GateConfig,
    clock: Option<SharedClock>,
    should_update: Option<FreshnessCheck>,
}

impl GateBuilder {
    pub fn new(update: UpdateFn) -> Self {
        Self {
            update,
            config: GateConfig::default(),
            clock: None,
            should_update: None,
        }
    }

    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Only update while `check` returns true
    pub fn should_update<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_update = Some(Arc::new(check));
        self
    }

    pub fn build(self) -> UpdateGate {
        UpdateGate {
            inner: Arc::new(GateInner {
                config: self.config,
                clock: self.clock.unwrap_or_else(clock::system),
                update: self.update,
                should_update: self.should_update,
                state: Mutex::new(GateState::default()),
                pending: ScheduledTask::new("scheduled update"),
                listener: ScheduledTask::new("signal listener"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn counting_gate(config: GateConfig, clock: Arc<ManualClock>) -> (UpdateGate, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let gate = UpdateGate::builder(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
        })
        .config(config)
        .clock(clock)
        .build();
        (gate, calls)
    }

    #[tokio::test]
    async fn test_can_update_initially() {
        let (gate, _calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());
        assert!(gate.can_update());
        assert!(!gate.is_updating());
        assert_eq!(gate.last_update(), None);
    }

    #[tokio::test]
    async fn test_at_most_one_concurrent_update() {
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let (counter, gate_release) = (calls.clone(), release.clone());
        let gate = UpdateGate::builder(move || {
            let counter = counter.clone();
            let release = gate_release.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok::<_, Error>(())
            }
        })
        .build();

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.perform_update().await })
        };
        while !gate.is_updating() {
            tokio::task::yield_now().await;
        }

        assert!(!gate.can_update());
        assert_eq!(gate.perform_update().await, UpdateOutcome::Skipped);

        release.notify_one();
        assert_eq!(first.await.unwrap(), UpdateOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!gate.is_updating());
    }

    #[tokio::test]
    async fn test_throttle_min_interval() {
        let clock = ManualClock::starting_now();
        let config = GateConfig {
            min_interval: Duration::from_secs(30),
            ..GateConfig::default()
        };
        let (gate, calls) = counting_gate(config, clock.clone());

        assert_eq!(gate.perform_update().await, UpdateOutcome::Completed);
        clock.advance(Duration::from_secs(10));
        assert_eq!(gate.perform_update().await, UpdateOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(20));
        assert_eq!(gate.perform_update().await, UpdateOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_record_update() {
        let clock = ManualClock::starting_now();
        let fail = Arc::new(AtomicBool::new(true));
        let flag = fail.clone();
        let gate = UpdateGate::builder(move || {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(Error::fetch("backend down"))
                } else {
                    Ok::<_, Error>(())
                }
            }
        })
        .clock(clock.clone())
        .build();

        assert_eq!(gate.perform_update().await, UpdateOutcome::Failed);
        assert_eq!(gate.last_update(), None);
        assert!(!gate.is_updating());

        fail.store(false, Ordering::SeqCst);
        assert_eq!(gate.perform_update().await, UpdateOutcome::Completed);
        assert_eq!(gate.last_update(), Some(clock.now()));
    }

    #[tokio::test]
    async fn test_freshness_predicate_blocks_update() {
        let fresh = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let is_fresh = fresh.clone();
        let gate = UpdateGate::builder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(()) }
        })
        .should_update(move || !is_fresh.load(Ordering::SeqCst))
        .build();

        assert!(!gate.can_update());
        assert_eq!(gate.perform_update().await, UpdateOutcome::Skipped);

        fresh.store(false, Ordering::SeqCst);
        assert_eq!(gate.perform_update().await, UpdateOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_update_bypasses_interval() {
        let (gate, calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());

        gate.perform_update().await;
        assert_eq!(gate.perform_update().await, UpdateOutcome::Skipped);
        assert_eq!(gate.force_update().await, UpdateOutcome::Completed);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_update_returns_to_idle() {
        let gate = UpdateGate::builder(|| async {
            std::future::pending::<()>().await;
            Ok::<_, Error>(())
        })
        .build();

        let running = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.perform_update().await })
        };
        while !gate.is_updating() {
            tokio::task::yield_now().await;
        }

        running.abort();
        let _ = running.await;

        assert!(!gate.is_updating());
        assert_eq!(gate.last_update(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_update_debounces() {
        let (gate, calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());

        gate.schedule_update(Duration::from_millis(100));
        gate.schedule_update(Duration::from_millis(100));
        gate.schedule_update(Duration::from_millis(100));
        assert!(gate.has_pending_update());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_schedules_after_delay() {
        let (gate, calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());

        gate.handle_signal(EnvSignal::Visibility(false));
        assert!(gate.handle_signal(EnvSignal::Visibility(true)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_updates_can_be_disabled() {
        let config = GateConfig {
            update_on_visibility: false,
            ..GateConfig::default()
        };
        let (gate, calls) = counting_gate(config, ManualClock::starting_now());

        assert!(!gate.handle_signal(EnvSignal::Visibility(true)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_requires_inactivity() {
        let clock = ManualClock::starting_now();
        let (gate, calls) = counting_gate(GateConfig::default(), clock.clone());

        gate.handle_signal(EnvSignal::Activity(ActivityKind::Pointer));
        clock.advance(Duration::from_secs(5));
        assert!(!gate.handle_signal(EnvSignal::Focus(true)));

        clock.advance(Duration::from_secs(31));
        assert!(gate.handle_signal(EnvSignal::Focus(true)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_idle_timer() {
        let clock = ManualClock::starting_now();
        let (gate, calls) = counting_gate(GateConfig::default(), clock.clone());

        gate.handle_signal(EnvSignal::Focus(false));
        clock.advance(Duration::from_secs(60));
        gate.handle_signal(EnvSignal::Activity(ActivityKind::Scroll));
        clock.advance(Duration::from_secs(1));

        assert!(!gate.handle_signal(EnvSignal::Focus(true)));
        assert!(!gate.has_pending_update());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_respect_throttle() {
        let clock = ManualClock::starting_now();
        let (gate, calls) = counting_gate(GateConfig::default(), clock.clone());

        gate.perform_update().await;
        assert!(!gate.handle_signal(EnvSignal::Visibility(true)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_hub_drives_updates() {
        let hub = SignalHub::new();
        let (gate, calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());
        gate.attach(&hub);

        hub.set_visible(false);
        hub.set_visible(true);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.snapshot().is_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_update() {
        let (gate, calls) = counting_gate(GateConfig::default(), ManualClock::starting_now());

        gate.schedule_update(Duration::from_millis(100));
        gate.shutdown();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
