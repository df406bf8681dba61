//! Advanced Circuit Breaker Example
//!
//! This example demonstrates:
//! 1. Sharing breakers by name through a registry
//! 2. Hooks for monitoring transitions
//! 3. A fallback that serves cached data while the circuit is open
//! 4. Broadcasting state notifications over a channel

use circuit_guard::{
    BreakerOptions, BreakerRegistry, ChannelNotificationSink, CircuitBreaker, HookRegistry,
};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl ServiceError {
    fn new(msg: &str) -> Self {
        ServiceError(msg.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

// A function that simulates an external service with varying failure patterns
async fn external_service_call(call: u32) -> Result<String, ServiceError> {
    if call <= 3 {
        Ok("Initial success".to_string())
    } else if call <= 8 {
        // Next 5 calls fail (should trip the breaker)
        Err(ServiceError::new("Service temporarily unavailable"))
    } else if call == 9 {
        // One call hangs past the deadline
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("Too late".to_string())
    } else {
        Ok("Service recovered".to_string())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Advanced Circuit Breaker Example ===\n");

    // 1. Set up a hook registry for observability
    let hooks = HookRegistry::new();
    hooks.set_on_open(|| println!("Circuit OPENED due to too many failures"));
    hooks.set_on_close(|| println!("Circuit CLOSED after successful recovery"));
    hooks.set_on_half_open(|| println!("Circuit HALF-OPEN, testing if service recovered"));

    // 2. Notifications go to a channel a monitoring task listens on
    let (sink, mut updates) = ChannelNotificationSink::new();
    let monitor = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            println!("[bus {}] {}", update.address, update.payload);
        }
    });

    // 3. Breakers are shared by name
    let options = BreakerOptions {
        max_failures: 3,
        timeout: 200,
        reset_timeout: 1_000,
        notification_address: Some("circuit-breaker.updates".to_string()),
        notification_period: 0,
        ..BreakerOptions::default()
    };
    let registry = BreakerRegistry::<String, ServiceError>::new();
    let breaker = registry.get_or_insert_with("inventory", || {
        CircuitBreaker::builder("inventory")
            .options(options)
            .hooks(hooks)
            .notification_sink(sink)
            .fallback(|err| {
                println!("Serving cached response because: {}", err);
                Ok("Cached inventory".to_string())
            })
            .build()
    });

    // 4. Simulate a series of calls
    for call in 1..=15 {
        println!("\n--- Call {} ---", call);

        match breaker.execute(|| external_service_call(call)).await {
            Ok(response) => println!("Service response: {}", response),
            Err(err) => println!("Service error: {}", err),
        }

        println!(
            "Circuit: state={}, failures={}",
            breaker.state(),
            breaker.failure_count()
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    registry.dispose_all();
    drop(breaker);
    monitor.abort();

    println!("\n=== Example Completed ===");
}
