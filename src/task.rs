//! Cancellable background task slot
//!
//! Debounce timers, staleness timers, pre-fetch delays and signal listeners
//! each own one slot. Arming a slot aborts whatever it held before, and
//! dropping the slot aborts the running task.

use std::future::Future;
use std::sync::Mutex;

use log::warn;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct ScheduledTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Spawn `fut`, replacing (and aborting) any task already in the slot.
    ///
    /// Returns false when called outside a tokio runtime; nothing is spawned.
    pub fn arm<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, {} not scheduled", self.name);
            return false;
        };

        let handle = runtime.spawn(fut);
        if let Ok(mut slot) = self.handle.lock()
            && let Some(previous) = slot.replace(handle)
        {
            previous.abort();
        }
        true
    }

    /// Abort the pending task, if any
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.handle.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }

    /// Whether a task is armed and has not finished yet
    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_task() {
        let slot = ScheduledTask::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            slot.arm(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let slot = ScheduledTask::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        slot.arm(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_pending());

        slot.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_arm_outside_runtime_is_noop() {
        let slot = ScheduledTask::new("test");
        assert!(!slot.arm(async {}));
        assert!(!slot.is_pending());
    }
}
