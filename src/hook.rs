//! Hook registry for circuit breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type TransitionHookFn = Arc<dyn Fn(&str, State, State) + Send + Sync + 'static>;
type EventHookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
///
/// Hooks receive the breaker name and run on the calling thread after the
/// breaker's state lock has been released, so they may inspect the breaker.
pub struct HookRegistry {
    on_state_change: RwLock<Option<TransitionHookFn>>,
    on_success: RwLock<Option<EventHookFn>>,
    on_failure: RwLock<Option<EventHookFn>>,
    on_rejected: RwLock<Option<EventHookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_state_change", &self.on_state_change.read().is_some())
            .field("on_success", &self.on_success.read().is_some())
            .field("on_failure", &self.on_failure.read().is_some())
            .field("on_rejected", &self.on_rejected.read().is_some())
            .finish()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_state_change: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_rejected: RwLock::new(None),
        }
    }

    /// Sets the hook called with `(name, from, to)` on every transition.
    pub fn set_on_state_change<F>(&self, f: F)
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        *self.on_state_change.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a protected call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a protected call fails.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the breaker denies a call.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    pub(crate) fn state_changed(&self, name: &str, from: State, to: State) {
        let hook = self.on_state_change.read().clone();
        if let Some(hook) = hook {
            hook(name, from, to);
        }
    }

    pub(crate) fn succeeded(&self, name: &str) {
        Self::fire(&self.on_success, name);
    }

    pub(crate) fn failed(&self, name: &str) {
        Self::fire(&self.on_failure, name);
    }

    pub(crate) fn rejected(&self, name: &str) {
        Self::fire(&self.on_rejected, name);
    }

    // Clone the hook out so a hook that re-registers does not deadlock.
    fn fire(slot: &RwLock<Option<EventHookFn>>, name: &str) {
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn empty_registry_is_a_no_op() {
        let hooks = HookRegistry::new();
        hooks.state_changed("b", State::Closed, State::Open);
        hooks.succeeded("b");
        hooks.failed("b");
        hooks.rejected("b");
    }

    #[test]
    fn hooks_receive_breaker_name_and_states() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        hooks.set_on_state_change(move |name, from, to| {
            log.lock().push(format!("{name}:{from}->{to}"));
        });
        let log = Arc::clone(&seen);
        hooks.set_on_rejected(move |name| log.lock().push(format!("{name}:rejected")));

        hooks.state_changed("email", State::Closed, State::Open);
        hooks.rejected("email");

        assert_eq!(
            *seen.lock(),
            vec!["email:closed->open".to_string(), "email:rejected".to_string()]
        );
    }
}
