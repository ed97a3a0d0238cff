//! Notification dispatch example
//!
//! A dispatcher sends through a flaky push provider. Each send is retried
//! with backoff behind a circuit breaker; once the breaker opens, messages
//! are queued as deferred-retry records instead of being retried in place.
//!
//! Run with `RUST_LOG=debug` to see retry and state-change logs.

use parking_lot::Mutex;
use resilience_rs::prelude::*;
use resilience_rs::{InMemoryMetrics, RetryableError};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
enum PushError {
    Unavailable,
    InvalidToken,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Unavailable => write!(f, "push provider unavailable"),
            PushError::InvalidToken => write!(f, "invalid device token"),
        }
    }
}

impl Error for PushError {}

/// Fails every call between the 3rd and the 12th.
struct FlakyPushProvider {
    calls: AtomicU32,
}

impl FlakyPushProvider {
    fn send(&self, device: &str, body: &str) -> Result<String, PushError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if device.is_empty() {
            return Err(PushError::InvalidToken);
        }
        if (3..=12).contains(&n) {
            return Err(PushError::Unavailable);
        }
        Ok(format!("push-{}-{}", n, body.len()))
    }
}

#[derive(Debug)]
struct DeferredRetry {
    device: String,
    body: String,
    not_before: Instant,
}

struct Dispatcher {
    provider: FlakyPushProvider,
    breaker: CircuitBreaker<String, PushError>,
    retry: RetryConfig,
    deferred: Mutex<Vec<DeferredRetry>>,
    retry_later: Duration,
}

impl Dispatcher {
    fn dispatch(&self, device: &str, body: &str) {
        let ctx = Context::with_timeout(Duration::from_secs(2));
        let result = retry_with_breaker(&ctx, &self.retry, &self.breaker, |_ctx| {
            self.provider.send(device, body)
        });

        match result {
            Ok(id) => println!("sent to {:<8} id={}", device, id),
            Err(ResilienceError::CircuitOpen) => {
                self.deferred.lock().push(DeferredRetry {
                    device: device.to_string(),
                    body: body.to_string(),
                    not_before: Instant::now() + self.retry_later,
                });
                println!("deferred {:<8} (provider circuit open)", device);
            }
            Err(err) => println!("dropped {:<8} {}", device, err),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let metrics = Arc::new(InMemoryMetrics::new());
    let breaker = CircuitBreaker::builder()
        .name("push")
        .failure_threshold(4)
        .timeout(Duration::from_millis(500))
        .metric_sink(Arc::clone(&metrics))
        .build();

    let dispatcher = Dispatcher {
        provider: FlakyPushProvider {
            calls: AtomicU32::new(0),
        },
        breaker,
        retry: RetryConfig::default()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(20))
            .with_max_backoff(Duration::from_millis(100))
            .with_retryable_error(RetryableError::new(PushError::Unavailable)),
        deferred: Mutex::new(Vec::new()),
        retry_later: Duration::from_millis(500),
    };

    for i in 0..8 {
        let device = if i == 1 { String::new() } else { format!("device-{}", i) };
        dispatcher.dispatch(&device, "your order has shipped");
    }

    println!("\nbreaker state: {}", dispatcher.breaker.state());
    thread::sleep(Duration::from_millis(600));

    let due: Vec<DeferredRetry> = dispatcher.deferred.lock().drain(..).collect();
    println!("replaying {} deferred notifications", due.len());
    for record in due {
        if record.not_before <= Instant::now() {
            dispatcher.dispatch(&record.device, &record.body);
        }
    }

    if let Some(snapshot) = metrics.snapshot("push") {
        println!(
            "\nrequests={} failures={} fallbacks={} opened={} state={}",
            snapshot.requests,
            snapshot.failures,
            snapshot.fallbacks,
            snapshot.transitions_between(State::Closed, State::Open),
            dispatcher.breaker.state()
        );
    }
}
