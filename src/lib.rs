//! # resilience-rs
//!
//! Retry with exponential backoff, circuit breaking and fallbacks for calls
//! to unreliable downstream dependencies such as push, SMS and email
//! providers or internal HTTP services.
//!
//! ## Building blocks
//!
//! - [`retry`] drives an attempt loop with capped exponential backoff and
//!   optional full jitter. It stops on success, on a non-retryable error, on
//!   exhaustion, or as soon as the caller's [`Context`] is done.
//! - [`CircuitBreaker`] is a three-state machine:
//!   - **Closed**: calls pass through; failures in the current interval are
//!     counted.
//!   - **Open**: calls are denied and routed to a [`Fallback`] with
//!     [`ResilienceError::CircuitOpen`].
//!   - **Half-Open**: after the open timeout, a limited number of probes are
//!     admitted to check whether the dependency has recovered.
//! - [`retry_with_breaker`] combines the two. A denied call ends the retry
//!   loop at once instead of burning attempts against a known-broken
//!   dependency.
//!
//! ## Basic Usage
//!
//! ```rust
//! use resilience_rs::{
//!     build_settings, retry_with_breaker, CircuitBreaker, Context, ResilienceError, RetryConfig,
//! };
//! use std::fmt;
//!
//! #[derive(Debug)]
//! struct ProviderError(String);
//!
//! impl fmt::Display for ProviderError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "provider error: {}", self.0)
//!     }
//! }
//!
//! impl std::error::Error for ProviderError {}
//!
//! let breaker: CircuitBreaker<String, ProviderError> =
//!     CircuitBreaker::new(build_settings("sms", 60, 30, 5, 1), None);
//! let config = RetryConfig::default();
//!
//! match retry_with_breaker(&Context::background(), &config, &breaker, |_ctx| {
//!     Ok("message-id-42".to_string())
//! }) {
//!     Ok(id) => println!("sent: {}", id),
//!     Err(ResilienceError::CircuitOpen) => println!("provider down, try later"),
//!     Err(err) => println!("send failed: {}", err),
//! }
//! ```
//!
//! ## Async Support
//!
//! With the `async` feature enabled, every entry point has an `_async`
//! counterpart driven by Tokio timers:
//!
//! ```rust,ignore
//! let result = retry_with_breaker_async(&ctx, &config, &breaker, |_ctx| async {
//!     client.send(&message).await
//! })
//! .await;
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - Async support with Tokio
//! - `prometheus` - Prometheus metrics integration
//! - `serde` - Deserializable retry and breaker configuration

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod backoff;
mod breaker;
mod compose;
mod config;
mod context;
mod error;
pub mod fallback;
mod hook;
mod metrics;
mod policy;
pub mod prelude;
mod retry;
mod state;

// Re-exports
pub use backoff::{calculate_backoff, calculate_backoff_with};
pub use breaker::CircuitBreaker;
pub use compose::retry_with_breaker;
#[cfg(feature = "async")]
pub use compose::retry_with_breaker_async;
pub use config::{
    build_settings, BreakerBuilder, RetryConfig, RetryableChecker, RetryableError, Settings,
};
#[cfg(feature = "serde")]
pub use config::{BreakerConfig, RetryPolicyConfig};
pub use context::{Context, ContextError};
pub use error::{ResilienceError, ResilienceResult};
pub use fallback::Fallback;
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusMetrics;
pub use metrics::{BreakerMetrics, InMemoryMetrics, MetricSink, NullMetricSink};
pub use policy::{BreakerPolicy, FailureRatePolicy, ThresholdPolicy};
#[cfg(feature = "async")]
pub use retry::retry_async;
pub use retry::{is_retryable_http_status, retry, should_retry};
pub use state::{Counts, State, Transition};
