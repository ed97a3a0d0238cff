//! Fallbacks invoked when a circuit breaker denies a call.
//!
//! A fallback receives the caller's context and the error that triggered it
//! (always [`ResilienceError::CircuitOpen`] when called by the breaker) and
//! either substitutes a result or propagates an error. Fallbacks never touch
//! breaker state.

use std::fmt::Display;
use std::sync::Arc;

use tracing::warn;

use crate::context::Context;
use crate::error::{ResilienceError, ResilienceResult};

/// Function invoked with the triggering error when a call is denied.
pub type Fallback<T, E> =
    Arc<dyn Fn(&Context, ResilienceError<E>) -> ResilienceResult<T, E> + Send + Sync + 'static>;

/// Returns the circuit-open error unchanged, leaving degradation to the
/// caller. This is what a breaker uses when no fallback is configured.
pub fn no_op<T, E>() -> Fallback<T, E>
where
    T: 'static,
    E: 'static,
{
    Arc::new(|_ctx: &Context, _err: ResilienceError<E>| Err(ResilienceError::CircuitOpen))
}

/// Substitutes a fixed value, logging the triggering error.
pub fn static_value<T, E>(value: T) -> Fallback<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Display + 'static,
{
    Arc::new(move |_ctx: &Context, err: ResilienceError<E>| {
        warn!(error = %err, "circuit breaker denied call, serving static fallback");
        Ok(value.clone())
    })
}

/// Logs which service is degraded and returns the circuit-open error.
pub fn graceful_degradation<T, E>(service: impl Into<String>) -> Fallback<T, E>
where
    T: 'static,
    E: Display + 'static,
{
    let service = service.into();
    Arc::new(move |_ctx: &Context, err: ResilienceError<E>| {
        warn!(service = %service, error = %err, "service degraded, circuit breaker is open");
        Err(ResilienceError::CircuitOpen)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ProviderError;

    impl Display for ProviderError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "provider error")
        }
    }

    #[test]
    fn no_op_returns_circuit_open() {
        let fallback = no_op::<u32, ProviderError>();
        let result = fallback(&Context::background(), ResilienceError::CircuitOpen);
        assert_eq!(result, Err(ResilienceError::CircuitOpen));
    }

    #[test]
    fn static_value_substitutes_result() {
        let fallback = static_value::<Vec<&str>, ProviderError>(Vec::new());
        let result = fallback(&Context::background(), ResilienceError::CircuitOpen);
        assert_eq!(result, Ok(Vec::new()));
    }

    #[test]
    fn graceful_degradation_propagates_circuit_open() {
        let fallback = graceful_degradation::<String, ProviderError>("sms-gateway");
        let result = fallback(&Context::background(), ResilienceError::CircuitOpen);
        assert_eq!(result, Err(ResilienceError::CircuitOpen));
    }
}
