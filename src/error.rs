//! Error types shared by the retry executor and the circuit breaker.

use std::error::Error;

use thiserror::Error;

use crate::context::ContextError;

/// Result type for resilience-wrapped operations.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Error returned by [`retry`](crate::retry),
/// [`CircuitBreaker::execute`](crate::CircuitBreaker::execute) and
/// [`retry_with_breaker`](crate::retry_with_breaker).
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit breaker denied the call. Callers should treat this as
    /// "try again later" rather than retrying synchronously.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller's context was canceled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The wrapped operation failed.
    #[error("operation failed: {0}")]
    Operation(#[source] E),
}

impl<E> ResilienceError<E> {
    /// Returns true if this is the circuit-open sentinel.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen)
    }

    /// Returns true if the error came from context cancellation or deadline.
    pub fn is_context(&self) -> bool {
        matches!(self, ResilienceError::Context(_))
    }

    /// Borrows the operation error, if any.
    pub fn operation(&self) -> Option<&E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error and returns the operation error, if any.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ResilienceError::CircuitOpen, ResilienceError::CircuitOpen) => true,
            (ResilienceError::Context(a), ResilienceError::Context(b)) => a == b,
            (ResilienceError::Operation(a), ResilienceError::Operation(b)) => a == b,
            _ => false,
        }
    }
}

/// Walks `err` and its `source()` chain looking for a value of type `T`.
pub(crate) fn find_in_chain<'a, T: Error + 'static>(
    err: &'a (dyn Error + 'static),
) -> Option<&'a T> {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}
