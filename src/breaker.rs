//! Core circuit breaker implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{generated_name, BreakerBuilder, Settings};
use crate::context::Context;
use crate::error::{ResilienceError, ResilienceResult};
use crate::fallback::{no_op, Fallback};
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::policy::{BreakerPolicy, ThresholdPolicy};
use crate::state::{Admission, Counts, State, StateMachine, Transitions};

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<T, E> {
    name: String,
    machine: StateMachine,
    fallback: Fallback<T, E>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// A circuit breaker guarding calls to one downstream dependency.
///
/// Clones share state, so hand a clone to every caller of the same
/// dependency. `T` and `E` are the protected operation's success and error
/// types; the fallback must produce the same `T`.
pub struct CircuitBreaker<T, E> {
    inner: Arc<BreakerInner<T, E>>,
}

impl<T: 'static, E: 'static> CircuitBreaker<T, E> {
    /// Creates a breaker from `settings`, with the threshold policy the
    /// settings describe and no metrics. `None` uses [`no_op`].
    pub fn new(settings: Settings, fallback: Option<Fallback<T, E>>) -> Self {
        let policy = Arc::new(ThresholdPolicy::new(
            settings.failure_threshold,
            settings.success_threshold,
        ));
        Self::with_parts(
            settings,
            policy,
            fallback,
            Arc::new(NullMetricSink),
            Arc::new(HookRegistry::new()),
        )
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder() -> BreakerBuilder<T, E> {
        BreakerBuilder::new()
    }

    pub(crate) fn with_parts(
        settings: Settings,
        policy: Arc<dyn BreakerPolicy>,
        fallback: Option<Fallback<T, E>>,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let name = if settings.name.is_empty() {
            generated_name()
        } else {
            settings.name
        };

        let machine = StateMachine::new(
            settings.interval,
            settings.timeout,
            policy,
            Instant::now(),
        );
        metric_sink.record_state(&name, State::Closed);

        Self {
            inner: Arc::new(BreakerInner {
                name,
                machine,
                fallback: fallback.unwrap_or_else(no_op),
                metric_sink,
                hooks,
            }),
        }
    }
}

impl<T, E> CircuitBreaker<T, E> {
    /// The breaker's name, as used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the current state of the circuit breaker.
    ///
    /// An open breaker whose timeout has passed reports `HalfOpen`.
    pub fn state(&self) -> State {
        let mut transitions = Transitions::new();
        let state = self.inner.machine.state(Instant::now(), &mut transitions);
        self.report(&transitions);
        state
    }

    /// Counts for the current generation.
    pub fn counts(&self) -> Counts {
        self.inner.machine.counts()
    }

    /// Runs `operation` if the breaker admits it, otherwise returns the
    /// fallback's result for [`ResilienceError::CircuitOpen`].
    ///
    /// Operation errors are returned as [`ResilienceError::Operation`]
    /// after being counted against the breaker.
    pub fn execute<F>(&self, ctx: &Context, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
    {
        let mut call = match self.pre_call() {
            Some(call) => call,
            None => return self.deny(ctx),
        };

        let result = operation(ctx);
        call.finish(result.is_ok());

        result.map_err(ResilienceError::Operation)
    }

    /// Forces the circuit breaker to the open state.
    pub fn force_open(&self) -> bool {
        self.force(State::Open)
    }

    /// Forces the circuit breaker to the closed state, clearing its counts.
    pub fn force_closed(&self) -> bool {
        self.force(State::Closed)
    }

    fn force(&self, to: State) -> bool {
        let mut transitions = Transitions::new();
        let changed = self.inner.machine.force(to, Instant::now(), &mut transitions);
        self.report(&transitions);
        changed
    }

    /// Asks the state machine for a slot; `None` means the call is denied.
    fn pre_call(&self) -> Option<CallGuard<'_, T, E>> {
        let mut transitions = Transitions::new();
        let admission = self.inner.machine.admit(Instant::now(), &mut transitions);
        self.report(&transitions);

        match admission {
            Admission::Allowed { generation } => {
                self.inner.metric_sink.record_request(&self.inner.name);
                Some(CallGuard {
                    breaker: self,
                    generation,
                    finished: false,
                })
            }
            Admission::Rejected { state } => {
                debug!(breaker = %self.inner.name, state = %state, "circuit breaker rejected call");
                self.inner.hooks.rejected(&self.inner.name);
                None
            }
        }
    }

    /// Processes the result of a call to update counts and possibly state.
    fn post_call(&self, generation: u64, success: bool) {
        let mut transitions = Transitions::new();
        self.inner
            .machine
            .settle(generation, success, Instant::now(), &mut transitions);

        if success {
            self.inner.hooks.succeeded(&self.inner.name);
        } else {
            self.inner.metric_sink.record_failure(&self.inner.name);
            self.inner.hooks.failed(&self.inner.name);
        }

        self.report(&transitions);
    }

    fn deny(&self, ctx: &Context) -> ResilienceResult<T, E> {
        self.inner.metric_sink.record_fallback(&self.inner.name);
        (self.inner.fallback)(ctx, ResilienceError::CircuitOpen)
    }

    // Runs after the state lock is released.
    fn report(&self, transitions: &Transitions) {
        let name = &self.inner.name;
        for transition in transitions {
            let (from, to) = (transition.from, transition.to);
            if to == State::Open {
                warn!(breaker = %name, from = %from, to = %to, "circuit breaker opened");
            } else {
                info!(breaker = %name, from = %from, to = %to, "circuit breaker state changed");
            }
            self.inner.metric_sink.record_state(name, to);
            self.inner.metric_sink.record_transition(name, from, to);
            self.inner.hooks.state_changed(name, from, to);
        }
    }
}

/// An admitted call. Dropping it unfinished, because the operation panicked
/// or an async call was abandoned, counts as a failure so a half-open probe
/// slot is never leaked.
struct CallGuard<'a, T, E> {
    breaker: &'a CircuitBreaker<T, E>,
    generation: u64,
    finished: bool,
}

impl<T, E> CallGuard<'_, T, E> {
    fn finish(&mut self, success: bool) {
        self.finished = true;
        self.breaker.post_call(self.generation, success);
    }
}

impl<T, E> Drop for CallGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.post_call(self.generation, false);
        }
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<T, E> Clone for CircuitBreaker<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("counts", &self.inner.machine.counts())
            .finish()
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<T, E> CircuitBreaker<T, E> {
    /// Async counterpart of [`CircuitBreaker::execute`].
    ///
    /// If the returned future is dropped while the operation is in flight,
    /// the call is counted as a failure.
    pub async fn execute_async<F, Fut>(&self, ctx: &Context, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.begin_async(ctx, operation) {
            Ok(pending) => pending.run().await,
            Err(denied) => denied,
        }
    }

    /// Asks for admission and only then creates the operation's future.
    /// A denied call yields the fallback's result instead.
    pub(crate) fn begin_async<F, Fut>(
        &self,
        ctx: &Context,
        operation: F,
    ) -> Result<PendingCall<'_, T, E, Fut>, ResilienceResult<T, E>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.pre_call() {
            Some(call) => Ok(PendingCall {
                call,
                future: operation(ctx.clone()),
            }),
            None => Err(self.deny(ctx)),
        }
    }
}

/// An admitted async call whose future has not been polled yet.
#[cfg(feature = "async")]
pub(crate) struct PendingCall<'a, T, E, Fut> {
    call: CallGuard<'a, T, E>,
    future: Fut,
}

#[cfg(feature = "async")]
impl<T, E, Fut> PendingCall<'_, T, E, Fut>
where
    Fut: std::future::Future<Output = Result<T, E>>,
{
    pub(crate) async fn run(mut self) -> ResilienceResult<T, E> {
        let result = self.future.await;
        self.call.finish(result.is_ok());
        result.map_err(ResilienceError::Operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::build_settings;
    use crate::metrics::InMemoryMetrics;
    use std::panic::{self, AssertUnwindSafe};

    type Breaker = CircuitBreaker<&'static str, &'static str>;

    #[test]
    fn unnamed_breakers_get_distinct_names() {
        let a = Breaker::new(Settings::default(), None);
        let b = Breaker::new(Settings::default(), None);
        assert!(a.name().starts_with("breaker-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn operation_error_is_not_masked() {
        let breaker = Breaker::new(build_settings("push", 60, 30, 5, 1), None);
        let result = breaker.execute(&Context::background(), |_| Err("timeout"));
        assert_eq!(result, Err(ResilienceError::Operation("timeout")));
        assert_eq!(breaker.counts().total_failures, 1);
    }

    #[test]
    fn panicking_operation_counts_as_failure() {
        let breaker = Breaker::new(build_settings("push", 60, 30, 1, 1), None);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            breaker.execute(&Context::background(), |_| -> Result<&'static str, &'static str> {
                panic!("provider client bug")
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(breaker.state(), State::Open);
    }

    #[test]
    fn rejected_calls_record_fallback_not_request() {
        let sink = Arc::new(InMemoryMetrics::new());
        let breaker = Breaker::builder()
            .name("sms")
            .failure_threshold(1)
            .metric_sink(Arc::clone(&sink))
            .build();

        let _ = breaker.execute(&Context::background(), |_| Err("down"));
        let _ = breaker.execute(&Context::background(), |_| Ok("unreachable"));

        let snapshot = sink.snapshot("sms").unwrap();
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.fallbacks, 1);
        assert_eq!(snapshot.state, 1.0);
    }
}
