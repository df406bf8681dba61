use circuit_guard::{BreakerError, CircuitBreaker};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

async fn call_service(attempt: u32) -> Result<String, ServiceError> {
    if attempt < 10 {
        if attempt % 2 == 0 {
            // Simulate an error on even attempts
            Err(ServiceError("External service error".to_string()))
        } else {
            Ok("Success".to_string())
        }
    } else {
        // After 10 calls, start succeeding to demonstrate recovery
        Ok("Success".to_string())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let breaker = CircuitBreaker::<String, ServiceError>::builder("external-service")
        .max_failures(2)
        .timeout(Duration::from_millis(500))
        .reset_timeout(Duration::from_secs(1))
        .build();

    println!("Circuit initial state: {}", breaker.state());

    for attempt in 1..=15 {
        println!("\nAttempt {}: ", attempt);

        match breaker.execute(|| call_service(attempt)).await {
            Ok(result) => println!("Call succeeded with result: {}", result),
            Err(BreakerError::Open { .. }) => {
                println!("Circuit is open, waiting before retry...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(err) => println!("Call failed with error: {}", err),
        }

        println!(
            "Current state: {}, failures: {}",
            breaker.state(),
            breaker.failure_count()
        );

        // Add a small delay between calls
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}
