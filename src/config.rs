//! Configuration for retries and circuit breakers.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::fallback::Fallback;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::policy::{BreakerPolicy, ThresholdPolicy};

/// Predicate deciding whether an operation error is worth another attempt.
pub type RetryableChecker = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static>;

/// A sentinel error eligible for retry.
///
/// Matches an operation error when the error itself, or any error in its
/// `source()` chain, is the sentinel.
#[derive(Clone)]
pub struct RetryableError {
    description: String,
    matcher: Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static>,
}

impl RetryableError {
    /// Matches errors equal to `sentinel`.
    pub fn new<S>(sentinel: S) -> Self
    where
        S: Error + PartialEq + Send + Sync + 'static,
    {
        Self {
            description: sentinel.to_string(),
            matcher: Arc::new(move |err: &(dyn Error + 'static)| {
                chain(err).any(|e| e.downcast_ref::<S>() == Some(&sentinel))
            }),
        }
    }

    /// Matches any error of type `S`.
    pub fn kind<S: Error + 'static>() -> Self {
        Self {
            description: std::any::type_name::<S>().to_string(),
            matcher: Arc::new(|err: &(dyn Error + 'static)| chain(err).any(|e| e.is::<S>())),
        }
    }

    /// Returns true if `err` or one of its sources is this sentinel.
    pub fn matches(&self, err: &(dyn Error + 'static)) -> bool {
        (self.matcher)(err)
    }
}

impl fmt::Debug for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetryableError").field(&self.description).finish()
    }
}

fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |e| (*e).source())
}

/// Retry policy executed by [`retry`](crate::retry).
///
/// Built from one of the presets and adjusted with the `with_*` setters.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first. Zero still runs once.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Draw each delay uniformly from `[0, delay]`.
    pub enable_jitter: bool,
    /// When non-empty, only these sentinels (or errors wrapping them) retry.
    pub retryable_errors: Vec<RetryableError>,
    /// Overrides the list and the default when set.
    pub retryable_checker: Option<RetryableChecker>,
}

impl Default for RetryConfig {
    /// 3 attempts, 1s initial, 30s cap, doubling, jitter on.
    fn default() -> Self {
        Self::preset(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl RetryConfig {
    fn preset(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier: 2.0,
            enable_jitter: true,
            retryable_errors: Vec::new(),
            retryable_checker: None,
        }
    }

    /// 5 attempts, 500ms initial, 16s cap, doubling, jitter on.
    pub fn aggressive() -> Self {
        Self::preset(5, Duration::from_millis(500), Duration::from_secs(16))
    }

    /// 2 attempts, 2s initial, 10s cap, doubling, jitter on.
    pub fn conservative() -> Self {
        Self::preset(2, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Sets the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay after the first failure.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the per-attempt growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables full jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.enable_jitter = enabled;
        self
    }

    /// Adds a sentinel to the retryable list.
    pub fn with_retryable_error(mut self, sentinel: RetryableError) -> Self {
        self.retryable_errors.push(sentinel);
        self
    }

    /// Installs a predicate that decides retryability on its own.
    pub fn with_retryable_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retryable_checker = Some(Arc::new(checker));
        self
    }

    /// Attempts actually executed: `max_attempts`, but never fewer than one.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("enable_jitter", &self.enable_jitter)
            .field("retryable_errors", &self.retryable_errors)
            .field("retryable_checker", &self.retryable_checker.is_some())
            .finish()
    }
}

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

static BREAKER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generates a process-unique breaker name.
pub(crate) fn generated_name() -> String {
    format!("breaker-{}", BREAKER_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Name used in logs and metric labels; generated when empty.
    pub name: String,
    /// Window after which closed-state counts are cleared. Zero never clears.
    pub interval: Duration,
    /// Time spent open before probing.
    pub timeout: Duration,
    /// Failures within one interval that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive probe successes that close a half-open breaker, and the
    /// number of probes allowed in flight at once.
    pub success_threshold: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: String::new(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

/// Builds [`Settings`] from plain numbers, substituting defaults for
/// non-positive inputs: interval 60s, timeout 30s, 5 failures, 1 success.
pub fn build_settings(
    name: impl Into<String>,
    interval_seconds: i64,
    timeout_seconds: i64,
    failure_threshold: i64,
    success_threshold: i64,
) -> Settings {
    fn secs_or(value: i64, default: Duration) -> Duration {
        u64::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .map_or(default, Duration::from_secs)
    }

    fn count_or(value: i64, default: u32) -> u32 {
        if value <= 0 {
            return default;
        }
        u32::try_from(value).unwrap_or(u32::MAX)
    }

    Settings {
        name: name.into(),
        interval: secs_or(interval_seconds, DEFAULT_INTERVAL),
        timeout: secs_or(timeout_seconds, DEFAULT_TIMEOUT),
        failure_threshold: count_or(failure_threshold, DEFAULT_FAILURE_THRESHOLD),
        success_threshold: count_or(success_threshold, DEFAULT_SUCCESS_THRESHOLD),
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<T, E> {
    settings: Settings,
    policy: Option<Arc<dyn BreakerPolicy>>,
    fallback: Option<Fallback<T, E>>,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl<T, E> Default for BreakerBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> BreakerBuilder<T, E> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            policy: None,
            fallback: None,
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Starts from existing settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the breaker name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    /// Sets the closed-state counting window.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    /// Sets how long the breaker stays open before probing.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Sets the failures per interval that trip the breaker.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.settings.failure_threshold = threshold;
        self
    }

    /// Sets the probe successes required to close the breaker.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.settings.success_threshold = threshold;
        self
    }

    /// Replaces the threshold policy derived from the settings. The policy
    /// also decides how many half-open probes may run at once.
    pub fn policy<P: BreakerPolicy>(mut self, policy: P) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Sets the fallback invoked for denied calls.
    pub fn fallback(mut self, fallback: Fallback<T, E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Builds the circuit breaker.
    pub fn build(self) -> CircuitBreaker<T, E>
    where
        T: 'static,
        E: 'static,
    {
        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(ThresholdPolicy::new(
                self.settings.failure_threshold,
                self.settings.success_threshold,
            ))
        });

        CircuitBreaker::with_parts(
            self.settings,
            policy,
            self.fallback,
            self.metric_sink,
            self.hook_registry,
        )
    }
}

#[cfg(feature = "serde")]
pub use self::serde_config::{BreakerConfig, RetryPolicyConfig};

#[cfg(feature = "serde")]
mod serde_config {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::{build_settings, RetryConfig, Settings};

    /// Retry policy as it appears in configuration files.
    ///
    /// Missing fields take the default preset's values.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RetryPolicyConfig {
        /// Total attempts.
        pub max_attempts: u32,
        /// Initial backoff in milliseconds.
        pub initial_backoff_ms: u64,
        /// Backoff cap in milliseconds.
        pub max_backoff_ms: u64,
        /// Growth factor.
        pub multiplier: f64,
        /// Full jitter.
        pub jitter: bool,
    }

    impl Default for RetryPolicyConfig {
        fn default() -> Self {
            Self {
                max_attempts: 3,
                initial_backoff_ms: 1_000,
                max_backoff_ms: 30_000,
                multiplier: 2.0,
                jitter: true,
            }
        }
    }

    impl RetryPolicyConfig {
        /// Converts to a runtime config with no error list or checker.
        pub fn into_retry_config(self) -> RetryConfig {
            RetryConfig::default()
                .with_max_attempts(self.max_attempts)
                .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
                .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
                .with_backoff_multiplier(self.multiplier)
                .with_jitter(self.jitter)
        }
    }

    /// Breaker settings as plain numbers; zero or negative means default.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BreakerConfig {
        /// Breaker name.
        pub name: String,
        /// Closed-state window in seconds.
        pub interval_seconds: i64,
        /// Open duration in seconds.
        pub timeout_seconds: i64,
        /// Failures per interval that trip the breaker.
        pub failure_threshold: i64,
        /// Probe successes that close the breaker.
        pub success_threshold: i64,
    }

    impl BreakerConfig {
        /// Converts through [`build_settings`], applying its defaults.
        pub fn into_settings(self) -> Settings {
            build_settings(
                self.name,
                self.interval_seconds,
                self.timeout_seconds,
                self.failure_threshold,
                self.success_threshold,
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn retry_policy_fills_missing_fields() {
            let parsed: RetryPolicyConfig =
                serde_json::from_str(r#"{"max_attempts": 4, "jitter": false}"#).unwrap();
            let config = parsed.into_retry_config();
            assert_eq!(config.max_attempts, 4);
            assert_eq!(config.initial_backoff, Duration::from_secs(1));
            assert_eq!(config.max_backoff, Duration::from_secs(30));
            assert!(!config.enable_jitter);
        }

        #[test]
        fn breaker_config_applies_defaults() {
            let parsed: BreakerConfig =
                serde_json::from_str(r#"{"name": "push", "timeout_seconds": 10}"#).unwrap();
            let settings = parsed.into_settings();
            assert_eq!(settings.name, "push");
            assert_eq!(settings.interval, Duration::from_secs(60));
            assert_eq!(settings.timeout, Duration::from_secs(10));
            assert_eq!(settings.failure_threshold, 5);
            assert_eq!(settings.success_threshold, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_contract() {
        let d = RetryConfig::default();
        assert_eq!(
            (d.max_attempts, d.initial_backoff, d.max_backoff),
            (3, Duration::from_secs(1), Duration::from_secs(30))
        );
        let a = RetryConfig::aggressive();
        assert_eq!(
            (a.max_attempts, a.initial_backoff, a.max_backoff),
            (5, Duration::from_millis(500), Duration::from_secs(16))
        );
        let c = RetryConfig::conservative();
        assert_eq!(
            (c.max_attempts, c.initial_backoff, c.max_backoff),
            (2, Duration::from_secs(2), Duration::from_secs(10))
        );
        for preset in [d, a, c] {
            assert_eq!(preset.backoff_multiplier, 2.0);
            assert!(preset.enable_jitter);
            assert!(preset.retryable_errors.is_empty());
            assert!(preset.retryable_checker.is_none());
        }
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let config = RetryConfig::default().with_max_attempts(0);
        assert_eq!(config.effective_attempts(), 1);
    }

    #[test]
    fn build_settings_defaults_non_positive_inputs() {
        let settings = build_settings("push", 0, -3, 0, -1);
        assert_eq!(
            settings,
            Settings {
                name: "push".to_string(),
                interval: Duration::from_secs(60),
                timeout: Duration::from_secs(30),
                failure_threshold: 5,
                success_threshold: 1,
            }
        );
    }

    #[test]
    fn build_settings_keeps_positive_inputs() {
        let settings = build_settings("", 10, 5, 3, 2);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(settings.success_threshold, 2);
        assert!(settings.name.is_empty());
    }

    #[derive(Debug, PartialEq)]
    enum ProviderError {
        RateLimited,
        BadRequest,
    }

    impl fmt::Display for ProviderError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Error for ProviderError {}

    #[derive(Debug)]
    struct DispatchError(ProviderError);

    impl fmt::Display for DispatchError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "dispatch failed")
        }
    }

    impl Error for DispatchError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn sentinel_matches_directly_and_through_wrapping() {
        let sentinel = RetryableError::new(ProviderError::RateLimited);
        assert!(sentinel.matches(&ProviderError::RateLimited));
        assert!(!sentinel.matches(&ProviderError::BadRequest));
        assert!(sentinel.matches(&DispatchError(ProviderError::RateLimited)));
        assert!(!sentinel.matches(&DispatchError(ProviderError::BadRequest)));
    }

    #[test]
    fn kind_matches_any_value_of_the_type() {
        let kind = RetryableError::kind::<ProviderError>();
        assert!(kind.matches(&DispatchError(ProviderError::BadRequest)));
        assert!(!kind.matches(&std::fmt::Error));
    }

    #[test]
    fn generated_names_are_unique() {
        let first = generated_name();
        let second = generated_name();
        assert!(first.starts_with("breaker-"));
        assert_ne!(first, second);
    }
}
