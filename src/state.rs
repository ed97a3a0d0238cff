//! Circuit breaker state machine implementation.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::policy::BreakerPolicy;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed = 0,

    /// Circuit is open and operations are rejected.
    Open = 1,

    /// Circuit is allowing a limited number of probes to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Lowercase label used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }

    /// Numeric encoding for the state gauge: closed 0, half-open 0.5, open 1.
    pub fn gauge_value(&self) -> f64 {
        match self {
            State::Closed => 0.0,
            State::HalfOpen => 0.5,
            State::Open => 1.0,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request and outcome counts for the breaker's current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted, including ones still in flight.
    pub requests: u32,
    /// Completed calls that succeeded.
    pub total_successes: u32,
    /// Completed calls that failed.
    pub total_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl Counts {
    /// Calls that have finished, successfully or not.
    pub fn completed(&self) -> u32 {
        self.total_successes.saturating_add(self.total_failures)
    }

    /// Share of completed calls that failed, 0.0 when nothing completed.
    pub fn failure_ratio(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            return 0.0;
        }
        self.total_failures as f64 / completed as f64
    }

    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// A state change observed while holding the breaker lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
}

/// Transitions collected under the lock and reported after it is released.
/// One call can cause at most two (open to half-open, then half-open to open).
pub(crate) type Transitions = SmallVec<[Transition; 2]>;

/// Outcome of asking the state machine to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may run; its result must be settled against `generation`.
    Allowed { generation: u64 },
    /// The call is denied; `state` is the state that denied it.
    Rejected { state: State },
}

struct Core {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Mutex-guarded breaker bookkeeping: state, counts and generation.
///
/// Every read that depends on time goes through `refresh`, so an open
/// breaker whose timeout has passed is observed as half-open by every
/// caller, and closed-state counts roll over at the interval boundary.
pub(crate) struct StateMachine {
    core: Mutex<Core>,
    interval: Duration,
    timeout: Duration,
    policy: Arc<dyn BreakerPolicy>,
}

impl StateMachine {
    pub(crate) fn new(
        interval: Duration,
        timeout: Duration,
        policy: Arc<dyn BreakerPolicy>,
        now: Instant,
    ) -> Self {
        let machine = Self {
            core: Mutex::new(Core {
                state: State::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
            interval,
            timeout,
            policy,
        };
        {
            let mut core = machine.core.lock();
            machine.new_generation(&mut core, now);
        }
        machine
    }

    /// Current state, applying any time-based transition first.
    pub(crate) fn state(&self, now: Instant, transitions: &mut Transitions) -> State {
        let mut core = self.core.lock();
        self.refresh(&mut core, now, transitions);
        core.state
    }

    pub(crate) fn counts(&self) -> Counts {
        self.core.lock().counts
    }

    /// Admits or rejects a call. Half-open admits at most the policy's
    /// `max_probes` calls in flight at once.
    pub(crate) fn admit(&self, now: Instant, transitions: &mut Transitions) -> Admission {
        let mut core = self.core.lock();
        self.refresh(&mut core, now, transitions);

        let probes_full = core.state == State::HalfOpen
            && Self::in_flight(&core.counts) >= self.policy.max_probes().max(1);
        if core.state == State::Open || probes_full {
            return Admission::Rejected { state: core.state };
        }

        core.counts.on_request();
        Admission::Allowed {
            generation: core.generation,
        }
    }

    /// Records the outcome of a call admitted in `generation`. Outcomes from
    /// an older generation are ignored.
    pub(crate) fn settle(
        &self,
        generation: u64,
        success: bool,
        now: Instant,
        transitions: &mut Transitions,
    ) {
        let mut core = self.core.lock();
        self.refresh(&mut core, now, transitions);
        if core.generation != generation {
            return;
        }

        if success {
            core.counts.on_success();
            if core.state == State::HalfOpen && self.policy.should_reset(&core.counts) {
                self.set_state(&mut core, State::Closed, now, transitions);
            }
        } else {
            core.counts.on_failure();
            match core.state {
                State::Closed if self.policy.should_trip(&core.counts) => {
                    self.set_state(&mut core, State::Open, now, transitions);
                }
                State::HalfOpen => self.set_state(&mut core, State::Open, now, transitions),
                _ => {}
            }
        }
    }

    /// Moves to `to` regardless of counts. Returns false if already there.
    pub(crate) fn force(&self, to: State, now: Instant, transitions: &mut Transitions) -> bool {
        let mut core = self.core.lock();
        self.refresh(&mut core, now, transitions);
        if core.state == to {
            return false;
        }
        self.set_state(&mut core, to, now, transitions);
        true
    }

    fn in_flight(counts: &Counts) -> u32 {
        counts.requests.saturating_sub(counts.completed())
    }

    fn refresh(&self, core: &mut Core, now: Instant, transitions: &mut Transitions) {
        match core.state {
            State::Closed => {
                if core.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(core, now);
                }
            }
            State::Open => {
                if core.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(core, State::HalfOpen, now, transitions);
                }
            }
            State::HalfOpen => {}
        }
    }

    fn set_state(&self, core: &mut Core, to: State, now: Instant, transitions: &mut Transitions) {
        let from = core.state;
        if from == to {
            return;
        }
        core.state = to;
        self.new_generation(core, now);
        transitions.push(Transition { from, to });
    }

    fn new_generation(&self, core: &mut Core, now: Instant) {
        core.generation = core.generation.wrapping_add(1);
        core.counts = Counts::default();
        core.expiry = match core.state {
            State::Closed if self.interval.is_zero() => None,
            State::Closed => now.checked_add(self.interval),
            State::Open => Some(now.checked_add(self.timeout).unwrap_or(now)),
            State::HalfOpen => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ThresholdPolicy;

    fn machine(now: Instant, failures: u32, successes: u32) -> StateMachine {
        StateMachine::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Arc::new(ThresholdPolicy::new(failures, successes)),
            now,
        )
    }

    fn run(sm: &StateMachine, success: bool, now: Instant, tr: &mut Transitions) -> bool {
        match sm.admit(now, tr) {
            Admission::Allowed { generation } => {
                sm.settle(generation, success, now, tr);
                true
            }
            Admission::Rejected { .. } => false,
        }
    }

    #[test]
    fn gauge_encoding() {
        assert_eq!(State::Closed.gauge_value(), 0.0);
        assert_eq!(State::HalfOpen.gauge_value(), 0.5);
        assert_eq!(State::Open.gauge_value(), 1.0);
        assert_eq!(State::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn trips_after_threshold_failures() {
        let t0 = Instant::now();
        let sm = machine(t0, 3, 1);
        let mut tr = Transitions::new();

        assert!(run(&sm, false, t0, &mut tr));
        assert!(run(&sm, true, t0, &mut tr));
        assert!(run(&sm, false, t0, &mut tr));
        assert_eq!(sm.state(t0, &mut tr), State::Closed);

        assert!(run(&sm, false, t0, &mut tr));
        assert_eq!(sm.state(t0, &mut tr), State::Open);
        assert_eq!(
            tr.as_slice(),
            &[Transition {
                from: State::Closed,
                to: State::Open
            }]
        );
        assert!(!run(&sm, true, t0, &mut tr));
    }

    #[test]
    fn interval_rollover_clears_closed_counts() {
        let t0 = Instant::now();
        let sm = machine(t0, 2, 1);
        let mut tr = Transitions::new();

        assert!(run(&sm, false, t0, &mut tr));
        let later = t0 + Duration::from_secs(61);
        assert!(run(&sm, false, later, &mut tr));
        assert_eq!(sm.state(later, &mut tr), State::Closed);
        assert_eq!(sm.counts().total_failures, 1);
    }

    #[test]
    fn open_becomes_half_open_after_timeout() {
        let t0 = Instant::now();
        let sm = machine(t0, 1, 2);
        let mut tr = Transitions::new();
        run(&sm, false, t0, &mut tr);

        assert_eq!(sm.state(t0 + Duration::from_secs(29), &mut tr), State::Open);
        assert_eq!(sm.state(t0 + Duration::from_secs(30), &mut tr), State::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let t0 = Instant::now();
        let sm = machine(t0, 1, 2);
        let mut tr = Transitions::new();
        run(&sm, false, t0, &mut tr);

        let t1 = t0 + Duration::from_secs(31);
        assert!(run(&sm, true, t1, &mut tr));
        assert_eq!(sm.state(t1, &mut tr), State::HalfOpen);
        assert!(run(&sm, true, t1, &mut tr));
        assert_eq!(sm.state(t1, &mut tr), State::Closed);
        assert_eq!(sm.counts(), Counts::default());

        let seen: Vec<(State, State)> = tr.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            seen,
            vec![
                (State::Closed, State::Open),
                (State::Open, State::HalfOpen),
                (State::HalfOpen, State::Closed),
            ]
        );
    }

    #[test]
    fn half_open_failure_reopens() {
        let t0 = Instant::now();
        let sm = machine(t0, 1, 3);
        let mut tr = Transitions::new();
        run(&sm, false, t0, &mut tr);

        let t1 = t0 + Duration::from_secs(31);
        assert!(run(&sm, true, t1, &mut tr));
        assert!(run(&sm, false, t1, &mut tr));
        assert_eq!(sm.state(t1, &mut tr), State::Open);
        assert!(!run(&sm, true, t1, &mut tr));
    }

    #[test]
    fn half_open_limits_in_flight_probes() {
        let t0 = Instant::now();
        let sm = machine(t0, 1, 2);
        let mut tr = Transitions::new();
        run(&sm, false, t0, &mut tr);

        let t1 = t0 + Duration::from_secs(31);
        assert!(matches!(sm.admit(t1, &mut tr), Admission::Allowed { .. }));
        assert!(matches!(sm.admit(t1, &mut tr), Admission::Allowed { .. }));
        assert_eq!(
            sm.admit(t1, &mut tr),
            Admission::Rejected {
                state: State::HalfOpen
            }
        );
    }

    #[test]
    fn finished_probes_free_their_slot() {
        struct ThreeSuccesses;

        impl BreakerPolicy for ThreeSuccesses {
            fn should_trip(&self, counts: &Counts) -> bool {
                counts.total_failures >= 1
            }

            fn should_reset(&self, counts: &Counts) -> bool {
                counts.consecutive_successes >= 3
            }
        }

        let t0 = Instant::now();
        let sm = StateMachine::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Arc::new(ThreeSuccesses),
            t0,
        );
        let mut tr = Transitions::new();
        run(&sm, false, t0, &mut tr);

        let t1 = t0 + Duration::from_secs(31);
        let generation = match sm.admit(t1, &mut tr) {
            Admission::Allowed { generation } => generation,
            other => panic!("probe rejected: {other:?}"),
        };
        assert!(matches!(sm.admit(t1, &mut tr), Admission::Rejected { .. }));
        sm.settle(generation, true, t1, &mut tr);

        assert!(run(&sm, true, t1, &mut tr));
        assert_eq!(sm.state(t1, &mut tr), State::HalfOpen);
        assert!(run(&sm, true, t1, &mut tr));
        assert_eq!(sm.state(t1, &mut tr), State::Closed);
    }

    #[test]
    fn stale_generation_results_are_ignored() {
        let t0 = Instant::now();
        let sm = machine(t0, 1, 1);
        let mut tr = Transitions::new();

        let slow = match sm.admit(t0, &mut tr) {
            Admission::Allowed { generation } => generation,
            Admission::Rejected { .. } => panic!("closed breaker rejected a call"),
        };
        run(&sm, false, t0, &mut tr);
        assert_eq!(sm.state(t0, &mut tr), State::Open);

        let t1 = t0 + Duration::from_secs(31);
        sm.settle(slow, false, t1, &mut tr);
        assert_eq!(sm.state(t1, &mut tr), State::HalfOpen);
    }

    #[test]
    fn force_reports_no_change_when_already_there() {
        let t0 = Instant::now();
        let sm = machine(t0, 5, 1);
        let mut tr = Transitions::new();
        assert!(!sm.force(State::Closed, t0, &mut tr));
        assert!(sm.force(State::Open, t0, &mut tr));
        assert!(!sm.force(State::Open, t0, &mut tr));
        assert!(sm.force(State::Closed, t0, &mut tr));
        assert_eq!(tr.len(), 2);
    }
}
