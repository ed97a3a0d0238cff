//! Exponential backoff with optional full jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Computes the wait before retrying after `attempt` (1-indexed) failed.
///
/// The delay is `initial_backoff * backoff_multiplier^(attempt - 1)`, capped
/// at `max_backoff`. With jitter enabled the result is drawn uniformly from
/// `[0, delay]` using the thread-local RNG.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    calculate_backoff_with(attempt, config, &mut rand::thread_rng())
}

/// Same as [`calculate_backoff`], drawing jitter from `rng`.
pub fn calculate_backoff_with<R>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration
where
    R: Rng,
{
    let capped = exponential(attempt, config);
    if !config.enable_jitter || capped.is_zero() {
        return capped;
    }

    let nanos = u64::try_from(capped.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rng.gen_range(0..=nanos))
}

fn exponential(attempt: u32, config: &RetryConfig) -> Duration {
    let max = config.max_backoff;
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);

    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }

    Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed(initial: Duration, max: Duration, multiplier: f64) -> RetryConfig {
        RetryConfig::default()
            .with_initial_backoff(initial)
            .with_max_backoff(max)
            .with_backoff_multiplier(multiplier)
            .with_jitter(false)
    }

    #[test]
    fn doubles_then_caps() {
        let config = fixed(Duration::from_secs(1), Duration::from_secs(30), 2.0);
        let delays: Vec<u64> = (1..=8)
            .map(|attempt| calculate_backoff(attempt, &config).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let config = fixed(Duration::from_millis(250), Duration::from_secs(5), 3.0);
        assert_eq!(calculate_backoff(0, &config), Duration::from_millis(250));
    }

    #[test]
    fn initial_above_max_is_clamped() {
        let config = fixed(Duration::from_secs(10), Duration::from_secs(3), 2.0);
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(3));
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let config = fixed(Duration::from_secs(1), Duration::from_secs(30), 10.0);
        assert_eq!(calculate_backoff(u32::MAX, &config), Duration::from_secs(30));
    }

    #[test]
    fn zero_initial_stays_zero_with_jitter() {
        let config = fixed(Duration::ZERO, Duration::from_secs(30), 2.0).with_jitter(true);
        for attempt in 1..5 {
            assert_eq!(calculate_backoff(attempt, &config), Duration::ZERO);
        }
    }

    #[test]
    fn jitter_varies_between_calls() {
        let config = fixed(Duration::from_secs(1), Duration::from_secs(30), 2.0).with_jitter(true);
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<Duration> = (0..20)
            .map(|_| calculate_backoff_with(3, &config, &mut rng))
            .collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    proptest! {
        #[test]
        fn jitter_stays_within_formula(
            attempt in 1u32..20,
            initial_ms in 0u64..5_000,
            max_ms in 0u64..60_000,
            seed in any::<u64>(),
        ) {
            let config = fixed(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                2.0,
            );
            let ceiling = calculate_backoff(attempt, &config);
            prop_assert!(ceiling <= config.max_backoff);

            let jittered = config.clone().with_jitter(true);
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = calculate_backoff_with(attempt, &jittered, &mut rng);
            prop_assert!(delay <= ceiling);
        }
    }
}
