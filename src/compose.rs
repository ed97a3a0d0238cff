//! Retry around a circuit breaker.

use std::error::Error;

use crate::breaker::CircuitBreaker;
use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::ResilienceResult;
use crate::retry;

/// Retries `operation` through `breaker`.
///
/// Each attempt goes through [`CircuitBreaker::execute`] and counts toward
/// the breaker like a direct call. A denied call is never retried: the
/// loop ends on the first circuit-open result and returns whatever the
/// breaker's fallback produced.
pub fn retry_with_breaker<T, E, F>(
    ctx: &Context,
    config: &RetryConfig,
    breaker: &CircuitBreaker<T, E>,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(&Context) -> Result<T, E>,
{
    retry::run(ctx, config, |ctx| breaker.execute(ctx, &mut operation))
}

/// Async counterpart of [`retry_with_breaker`].
#[cfg(feature = "async")]
pub async fn retry_with_breaker_async<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    breaker: &CircuitBreaker<T, E>,
    mut operation: F,
) -> ResilienceResult<T, E>
where
    E: Error + 'static,
    F: FnMut(Context) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    retry::run_async(ctx, config, |ctx| {
        let started = breaker.begin_async(&ctx, &mut operation);
        async move {
            match started {
                Ok(pending) => pending.run().await,
                Err(denied) => denied,
            }
        }
    })
    .await
}
