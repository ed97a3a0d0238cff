//! Policy engine for circuit breaker trip and reset decisions.

use crate::state::Counts;

/// Decides when a breaker trips open and when a half-open breaker closes.
///
/// Both methods see the counts of the current generation only: closed-state
/// counts roll over every `interval`, and half-open counts start fresh when
/// the breaker begins probing.
pub trait BreakerPolicy: Send + Sync + 'static {
    /// Called after each failure while closed.
    fn should_trip(&self, counts: &Counts) -> bool;

    /// Called after each success while half-open.
    fn should_reset(&self, counts: &Counts) -> bool;

    /// Probes allowed in flight at once while half-open. Probes are
    /// admitted until `should_reset` closes the breaker or one fails.
    fn max_probes(&self) -> u32 {
        1
    }
}

/// Trips once failures in the current interval reach `failure_threshold`
/// and closes after `success_threshold` consecutive probe successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    failure_threshold: u32,
    success_threshold: u32,
}

impl ThresholdPolicy {
    /// Creates a threshold policy. Zero thresholds are raised to 1.
    pub fn new(failure_threshold: u32, success_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
        }
    }
}

impl BreakerPolicy for ThresholdPolicy {
    fn should_trip(&self, counts: &Counts) -> bool {
        counts.total_failures >= self.failure_threshold
    }

    fn should_reset(&self, counts: &Counts) -> bool {
        counts.consecutive_successes >= self.success_threshold
    }

    fn max_probes(&self) -> u32 {
        self.success_threshold
    }
}

/// Trips on error rate once the interval has seen enough traffic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureRatePolicy {
    failure_ratio: f64,
    min_requests: u32,
    success_threshold: u32,
}

impl FailureRatePolicy {
    /// Creates a rate policy: trip when `failures / requests >= failure_ratio`
    /// and at least `min_requests` calls completed in the interval.
    pub fn new(failure_ratio: f64, min_requests: u32, success_threshold: u32) -> Self {
        Self {
            failure_ratio,
            min_requests: min_requests.max(1),
            success_threshold: success_threshold.max(1),
        }
    }
}

impl BreakerPolicy for FailureRatePolicy {
    fn should_trip(&self, counts: &Counts) -> bool {
        counts.completed() >= self.min_requests && counts.failure_ratio() >= self.failure_ratio
    }

    fn should_reset(&self, counts: &Counts) -> bool {
        counts.consecutive_successes >= self.success_threshold
    }

    fn max_probes(&self) -> u32 {
        self.success_threshold
    }
}
