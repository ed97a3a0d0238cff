//! Re-exports the types most callers need.
//!
//! # Example
//! ```rust,no_run
//! use resilience_rs::prelude::*;
//!
//! let config = RetryConfig::aggressive();
//! let ctx = Context::with_timeout(std::time::Duration::from_secs(5));
//! # let _ = (config, ctx);
//! ```

pub use crate::{
    build_settings, retry, retry_with_breaker, CircuitBreaker, Context, ResilienceError,
    ResilienceResult, RetryConfig, RetryableError, Settings, State,
};

#[cfg(feature = "async")]
pub use crate::{retry_async, retry_with_breaker_async};
