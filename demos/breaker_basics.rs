//! Circuit breaker basics
//!
//! Shows the breaker tripping, short-circuiting to a fallback while open,
//! probing in half-open and closing again, with hooks printing each event.

use resilience_rs::{fallback, CircuitBreaker, Context, HookRegistry, ResilienceError};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

// First 3 calls succeed, the next 5 fail, then the service recovers
fn external_service_call(call_count: &mut u32) -> Result<String, ServiceError> {
    *call_count += 1;
    match *call_count {
        1..=3 => Ok("Initial success".to_string()),
        4..=8 => Err(ServiceError("Service temporarily unavailable".to_string())),
        _ => Ok("Service recovered".to_string()),
    }
}

fn main() {
    println!("=== Circuit Breaker Basics ===\n");

    let hooks = HookRegistry::new();
    hooks.set_on_state_change(|name, from, to| {
        println!("  [{}] state changed: {} -> {}", name, from, to);
    });
    hooks.set_on_rejected(|name| println!("  [{}] call rejected", name));

    let breaker = CircuitBreaker::<String, ServiceError>::builder()
        .name("catalog")
        .failure_threshold(3)
        .success_threshold(2)
        .timeout(Duration::from_secs(1))
        .fallback(fallback::static_value("cached catalog".to_string()))
        .hooks(hooks)
        .build();
    let ctx = Context::background();

    println!("Initial state: {}\n", breaker.state());

    let mut call_count = 0;
    for i in 1..=14 {
        print!("Call {:>2}: ", i);
        match breaker.execute(&ctx, |_| external_service_call(&mut call_count)) {
            Ok(result) => println!("{}", result),
            Err(ResilienceError::Operation(err)) => println!("failed: {}", err),
            Err(err) => println!("error: {}", err),
        }

        if i == 8 {
            println!("\nWaiting for the open timeout...\n");
            thread::sleep(Duration::from_millis(1100));
        } else {
            thread::sleep(Duration::from_millis(100));
        }
    }

    let counts = breaker.counts();
    println!(
        "\nFinal state: {} (requests={}, failures={})",
        breaker.state(),
        counts.requests,
        counts.total_failures
    );
}
