//! Retry executor and retryable-error classification.

use std::error::Error;
use std::time::Duration;

use tracing::debug;

use crate::backoff::calculate_backoff;
use crate::config::RetryConfig;
use crate::context::{Context, ContextError};
use crate::error::{find_in_chain, ResilienceError, ResilienceResult};

/// Decides whether `err` deserves another attempt under `config`.
///
/// Circuit-open and context errors are never retried, whatever the config
/// says. Otherwise the checker decides if one is set, then the sentinel
/// list if it is non-empty, and anything else is assumed transient.
pub fn should_retry<E>(err: &ResilienceError<E>, config: &RetryConfig) -> bool
where
    E: Error + 'static,
{
    let err: &(dyn Error + 'static) = match err {
        ResilienceError::CircuitOpen | ResilienceError::Context(_) => return false,
        ResilienceError::Operation(e) => e,
    };

    if find_in_chain::<ContextError>(err).is_some() {
        return false;
    }

    if let Some(checker) = &config.retryable_checker {
        return checker(err);
    }

    if !config.retryable_errors.is_empty() {
        return config.retryable_errors.iter().any(|s| s.matches(err));
    }

    true
}

/// Returns true for HTTP statuses worth retrying: 408, 429, 500, 502, 503
/// and 504.
pub fn is_retryable_http_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made.
///
/// The context is checked before every attempt and interrupts backoff
/// waits; in both cases the context error is returned. Otherwise the last
/// attempt's error is returned unchanged.
pub fn retry<T, E, F>(
    ctx: &Context,
    config: &RetryConfig,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(&Context) -> Result<T, E>,
{
    run(ctx, config, |ctx| operation(ctx).map_err(ResilienceError::Operation))
}

pub(crate) fn run<T, E, F>(
    ctx: &Context,
    config: &RetryConfig,
    mut attempt_fn: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(&Context) -> ResilienceResult<T, E>,
{
    let max_attempts = config.effective_attempts();
    let mut attempt = 1;

    loop {
        if let Some(err) = ctx.err() {
            debug!(attempt, error = %err, "context done, not starting attempt");
            return Err(err.into());
        }

        let err = match attempt_fn(ctx) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !should_retry(&err, config) {
            return Err(err);
        }

        let delay = calculate_backoff(attempt, config);
        debug!(
            attempt,
            max_attempts,
            delay_ms = millis(delay),
            error = %err,
            "attempt failed, backing off"
        );
        ctx.sleep(delay)?;
        attempt += 1;
    }
}

/// Async counterpart of [`retry`]; the operation receives an owned context.
#[cfg(feature = "async")]
pub async fn retry_async<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(Context) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    run_async(ctx, config, |ctx| {
        let fut = operation(ctx);
        async move { fut.await.map_err(ResilienceError::Operation) }
    })
    .await
}

#[cfg(feature = "async")]
pub(crate) async fn run_async<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    mut attempt_fn: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(Context) -> Fut,
    Fut: std::future::Future<Output = ResilienceResult<T, E>>,
{
    let max_attempts = config.effective_attempts();
    let mut attempt = 1;

    loop {
        if let Some(err) = ctx.err() {
            debug!(attempt, error = %err, "context done, not starting attempt");
            return Err(err.into());
        }

        let err = match attempt_fn(ctx.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !should_retry(&err, config) {
            return Err(err);
        }

        let delay = calculate_backoff(attempt, config);
        debug!(
            attempt,
            max_attempts,
            delay_ms = millis(delay),
            error = %err,
            "attempt failed, backing off"
        );
        ctx.sleep_async(delay).await?;
        attempt += 1;
    }
}
