//! Metric sinks observing circuit breaker activity.
//!
//! Sinks are write-only from the breaker's point of view and never affect
//! control flow. Every method receives the breaker name so one sink can
//! serve many breakers.

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::state::State;

/// Trait for metrics sinks that can receive circuit breaker events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records the breaker's current state (gauge).
    fn record_state(&self, breaker: &str, state: State);

    /// Records a state transition event.
    fn record_transition(&self, breaker: &str, from: State, to: State);

    /// Records a call admitted by the breaker.
    fn record_request(&self, breaker: &str);

    /// Records a failed call.
    fn record_failure(&self, breaker: &str);

    /// Records a fallback invocation for a denied call.
    fn record_fallback(&self, breaker: &str);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state(&self, _breaker: &str, _state: State) {}
    fn record_transition(&self, _breaker: &str, _from: State, _to: State) {}
    fn record_request(&self, _breaker: &str) {}
    fn record_failure(&self, _breaker: &str) {}
    fn record_fallback(&self, _breaker: &str) {}
}

/// Counter snapshot for one breaker in [`InMemoryMetrics`].
#[derive(Debug, Clone, Default)]
pub struct BreakerMetrics {
    /// Last recorded state gauge value.
    pub state: f64,
    /// Admitted calls.
    pub requests: u64,
    /// Failed calls.
    pub failures: u64,
    /// Fallback invocations.
    pub fallbacks: u64,
    /// Transition counts keyed by (from, to).
    pub transitions: AHashMap<(State, State), u64>,
}

impl BreakerMetrics {
    /// Number of recorded transitions from `from` to `to`.
    pub fn transitions_between(&self, from: State, to: State) -> u64 {
        self.transitions.get(&(from, to)).copied().unwrap_or(0)
    }
}

/// Process-local counters, handy for tests and debug endpoints.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    breakers: Mutex<AHashMap<String, BreakerMetrics>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters recorded for `breaker`.
    pub fn snapshot(&self, breaker: &str) -> Option<BreakerMetrics> {
        self.breakers.lock().get(breaker).cloned()
    }

    /// Names of every breaker that has reported at least once.
    pub fn breaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn update(&self, breaker: &str, f: impl FnOnce(&mut BreakerMetrics)) {
        let mut breakers = self.breakers.lock();
        match breakers.get_mut(breaker) {
            Some(entry) => f(entry),
            None => f(breakers.entry(breaker.to_owned()).or_default()),
        }
    }
}

impl MetricSink for InMemoryMetrics {
    fn record_state(&self, breaker: &str, state: State) {
        self.update(breaker, |m| m.state = state.gauge_value());
    }

    fn record_transition(&self, breaker: &str, from: State, to: State) {
        self.update(breaker, |m| *m.transitions.entry((from, to)).or_insert(0) += 1);
    }

    fn record_request(&self, breaker: &str) {
        self.update(breaker, |m| m.requests += 1);
    }

    fn record_failure(&self, breaker: &str) {
        self.update(breaker, |m| m.failures += 1);
    }

    fn record_fallback(&self, breaker: &str) {
        self.update(breaker, |m| m.fallbacks += 1);
    }
}

impl<M: MetricSink> MetricSink for std::sync::Arc<M> {
    fn record_state(&self, breaker: &str, state: State) {
        (**self).record_state(breaker, state)
    }

    fn record_transition(&self, breaker: &str, from: State, to: State) {
        (**self).record_transition(breaker, from, to)
    }

    fn record_request(&self, breaker: &str) {
        (**self).record_request(breaker)
    }

    fn record_failure(&self, breaker: &str) {
        (**self).record_failure(breaker)
    }

    fn record_fallback(&self, breaker: &str) {
        (**self).record_fallback(breaker)
    }
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetrics;

#[cfg(feature = "prometheus")]
mod prometheus {
    use std::sync::atomic::AtomicU64;

    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::gauge::Gauge;
    use prometheus_client::registry::Registry;

    use super::MetricSink;
    use crate::state::State;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct BreakerLabels {
        breaker: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        breaker: String,
        from: String,
        to: String,
    }

    /// Prometheus-backed sink registered into a caller-owned [`Registry`].
    #[derive(Clone, Default)]
    pub struct PrometheusMetrics {
        state: Family<BreakerLabels, Gauge<f64, AtomicU64>>,
        requests: Family<BreakerLabels, Counter>,
        failures: Family<BreakerLabels, Counter>,
        fallbacks: Family<BreakerLabels, Counter>,
        transitions: Family<TransitionLabels, Counter>,
    }

    impl PrometheusMetrics {
        /// Creates the metric families and registers them in `registry`.
        pub fn register(registry: &mut Registry) -> Self {
            let metrics = Self::default();
            registry.register(
                "circuit_breaker_state",
                "Circuit breaker state (0 closed, 0.5 half-open, 1 open)",
                metrics.state.clone(),
            );
            registry.register(
                "circuit_breaker_requests",
                "Calls admitted by the circuit breaker",
                metrics.requests.clone(),
            );
            registry.register(
                "circuit_breaker_failures",
                "Calls that failed behind the circuit breaker",
                metrics.failures.clone(),
            );
            registry.register(
                "circuit_breaker_fallbacks",
                "Fallback invocations for denied calls",
                metrics.fallbacks.clone(),
            );
            registry.register(
                "circuit_breaker_state_changes",
                "Circuit breaker state transitions",
                metrics.transitions.clone(),
            );
            metrics
        }

        fn labels(breaker: &str) -> BreakerLabels {
            BreakerLabels {
                breaker: breaker.to_owned(),
            }
        }
    }

    impl MetricSink for PrometheusMetrics {
        fn record_state(&self, breaker: &str, state: State) {
            self.state
                .get_or_create(&Self::labels(breaker))
                .set(state.gauge_value());
        }

        fn record_transition(&self, breaker: &str, from: State, to: State) {
            let labels = TransitionLabels {
                breaker: breaker.to_owned(),
                from: from.as_str().to_owned(),
                to: to.as_str().to_owned(),
            };
            self.transitions.get_or_create(&labels).inc();
        }

        fn record_request(&self, breaker: &str) {
            self.requests.get_or_create(&Self::labels(breaker)).inc();
        }

        fn record_failure(&self, breaker: &str) {
            self.failures.get_or_create(&Self::labels(breaker)).inc();
        }

        fn record_fallback(&self, breaker: &str) {
            self.fallbacks.get_or_create(&Self::labels(breaker)).inc();
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_counts_per_breaker() {
        let sink = InMemoryMetrics::new();
        sink.record_request("push");
        sink.record_request("push");
        sink.record_failure("push");
        sink.record_fallback("email");
        sink.record_transition("push", State::Closed, State::Open);
        sink.record_state("push", State::Open);

        let push = sink.snapshot("push").unwrap();
        assert_eq!(push.requests, 2);
        assert_eq!(push.failures, 1);
        assert_eq!(push.state, 1.0);
        assert_eq!(push.transitions_between(State::Closed, State::Open), 1);
        assert_eq!(push.transitions_between(State::Open, State::HalfOpen), 0);

        assert_eq!(sink.snapshot("email").unwrap().fallbacks, 1);
        assert!(sink.snapshot("sms").is_none());
        assert_eq!(sink.breaker_names(), vec!["email", "push"]);
    }
}
