//! Environment signals: page visibility, window focus and user activity

use std::sync::Mutex;
use tokio::sync::broadcast;

/// Channel depth; a slow gate that falls further behind skips old signals.
const SIGNAL_CAPACITY: usize = 64;

/// Kind of user activity that resets the idle timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
}

/// A change in the environment the gate reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSignal {
    /// Page became visible (`true`) or hidden (`false`)
    Visibility(bool),
    /// Window gained (`true`) or lost (`false`) focus
    Focus(bool),
    Activity(ActivityKind),
}

/// Current environment booleans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    pub visible: bool,
    pub focused: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            visible: true,
            focused: true,
        }
    }
}

/// Source of environment signals.
///
/// The host (UI shell, terminal, test) reports changes here; every attached
/// gate receives them. Visibility and focus only broadcast on actual change.
pub struct SignalHub {
    tx: broadcast::Sender<EnvSignal>,
    current: Mutex<Environment>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        Self::with_environment(Environment::default())
    }

    pub fn with_environment(environment: Environment) -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            tx,
            current: Mutex::new(environment),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnvSignal> {
        self.tx.subscribe()
    }

    pub fn environment(&self) -> Environment {
        self.current.lock().map(|env| *env).unwrap_or_default()
    }

    pub fn set_visible(&self, visible: bool) {
        let changed = self.update(|env| std::mem::replace(&mut env.visible, visible) != visible);
        if changed {
            self.emit(EnvSignal::Visibility(visible));
        }
    }

    pub fn set_focused(&self, focused: bool) {
        let changed = self.update(|env| std::mem::replace(&mut env.focused, focused) != focused);
        if changed {
            self.emit(EnvSignal::Focus(focused));
        }
    }

    pub fn user_activity(&self, kind: ActivityKind) {
        self.emit(EnvSignal::Activity(kind));
    }

    fn update(&self, f: impl FnOnce(&mut Environment) -> bool) -> bool {
        self.current.lock().map(|mut env| f(&mut env)).unwrap_or(false)
    }

    fn emit(&self, signal: EnvSignal) {
        // No receivers is fine: nothing is listening yet
        let _ = self.tx.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_changes_are_broadcast() {
        let hub = SignalHub::new();
        let mut rx = hub.subscribe();

        hub.set_visible(true); // already visible
        hub.set_visible(false);
        hub.set_focused(false);
        hub.user_activity(ActivityKind::Keyboard);

        assert_eq!(rx.recv().await.unwrap(), EnvSignal::Visibility(false));
        assert_eq!(rx.recv().await.unwrap(), EnvSignal::Focus(false));
        assert_eq!(
            rx.recv().await.unwrap(),
            EnvSignal::Activity(ActivityKind::Keyboard)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_environment_tracks_state() {
        let hub = SignalHub::new();
        hub.set_focused(false);

        assert_eq!(
            hub.environment(),
            Environment {
                visible: true,
                focused: false
            }
        );
    }
}
