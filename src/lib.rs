//! # circuit-guard
//!
//! An async circuit breaker for Rust applications: consecutive-failure
//! tripping, call deadlines, timed single-trial recovery, fallbacks and
//! state-change notifications.
//!
//! ## What is a Circuit Breaker?
//!
//! The Circuit Breaker pattern helps prevent cascading failures in distributed systems
//! by temporarily disabling operations that are likely to fail. This pattern is inspired
//! by electrical circuit breakers and operates in three states:
//!
//! - **Closed**: Normal operation. Calls pass through to the protected resource, and
//!   consecutive failures are counted. Reaching `max_failures` opens the circuit.
//! - **Open**: Calls are immediately rejected without reaching the resource. After
//!   `reset_timeout` the circuit half-opens.
//! - **Half-Open**: Exactly one trial call is admitted. Its success closes the circuit,
//!   its failure or timeout opens it again.
//!
//! ## Basic Usage
//!
//! ```rust
//! use circuit_guard::{BreakerError, CircuitBreaker};
//! use std::fmt;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "Service error: {}", self.0)
//!     }
//! }
//!
//! impl std::error::Error for ServiceError {}
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::<String, ServiceError>::builder("inventory")
//!     .max_failures(3)
//!     .timeout(Duration::from_millis(500))
//!     .reset_timeout(Duration::from_secs(30))
//!     .build();
//!
//! match breaker.execute(|| async { Ok("in stock".to_string()) }).await {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::Open { .. }) => println!("Circuit is open, call was prevented"),
//!     Err(err) => println!("Call failed: {}", err),
//! }
//! # }
//! ```
//!
//! ## Fallbacks
//!
//! A fallback turns rejected calls (and, with `fallback_on_failure`, failed
//! ones) into a substitute value:
//!
//! ```rust
//! # use circuit_guard::CircuitBreaker;
//! # #[derive(Debug)]
//! # struct ServiceError;
//! # impl std::fmt::Display for ServiceError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//! #         write!(f, "service error")
//! #     }
//! # }
//! # impl std::error::Error for ServiceError {}
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::<String, ServiceError>::builder("inventory")
//!     .fallback_on_failure(true)
//!     .fallback(|_err| Ok("unknown".to_string()))
//!     .build();
//!
//! let stock = breaker.execute(|| async { Err(ServiceError) }).await;
//! assert_eq!(stock.ok().as_deref(), Some("unknown"));
//! # }
//! ```
//!
//! ## Notifications
//!
//! With a notification address configured, every transition (and, every
//! `notification_period`, a snapshot) is published to a [`NotificationSink`]
//! as `{"state", "name", "failures", "node"}`.
//!
//! ## Features
//!
//! - `prometheus` - Prometheus metrics integration

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod config;
mod dispatch;
mod error;
mod fallback;
mod hook;
mod metrics;
mod notification;
mod outcome;
pub mod prelude;
mod registry;
mod state;
mod timer;

// Re-exports
pub use breaker::CircuitBreaker;
pub use config::{BreakerBuilder, BreakerOptions};
pub use error::{BreakerError, BreakerResult, ConfigError};
pub use fallback::FallbackFn;
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusMetricSink;
pub use metrics::{MetricSink, NullMetricSink};
pub use notification::{
    local_node_id, ChannelNotificationSink, NotificationEnvelope, NotificationSink,
    NullNotificationSink, StateNotification, NODE_ID_ENV,
};
pub use outcome::CallOutcome;
pub use registry::BreakerRegistry;
pub use state::State;
pub use timer::{PeriodicTask, TimerHandle, TimerService, TimerTask, TokioTimer};
