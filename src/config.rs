//! Configuration for circuit breakers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, ConfigError};
use crate::fallback::FallbackFn;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::notification::{local_node_id, NotificationSink, NullNotificationSink};
use crate::timer::{TimerService, TokioTimer};

/// Recognised configuration of a single breaker.
///
/// Durations are whole milliseconds so the structure maps one-to-one onto
/// configuration documents:
///
/// ```json
/// { "maxFailures": 3, "timeout": 500, "resetTimeout": -1, "notificationAddress": "breakers" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerOptions {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Deadline for an admitted call; zero or negative disables it.
    pub timeout: i64,
    /// Delay before an open circuit half-opens; negative disables it.
    pub reset_timeout: i64,
    /// Route operation failures through the fallback too.
    pub fallback_on_failure: bool,
    /// Where state notifications go; absent disables them.
    pub notification_address: Option<String>,
    /// Period of unsolicited snapshots; zero disables them.
    pub notification_period: i64,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: 10_000,
            reset_timeout: 30_000,
            fallback_on_failure: false,
            notification_address: None,
            notification_period: 2_000,
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn positive(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

impl BreakerOptions {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(document)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "maxFailures",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.notification_period < 0 {
            return Err(ConfigError::Invalid {
                field: "notificationPeriod",
                reason: format!("must not be negative, got {}", self.notification_period),
            });
        }
        if let Some(address) = &self.notification_address {
            if address.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "notificationAddress",
                    reason: "must not be blank".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The call deadline, if enabled.
    pub fn timeout_duration(&self) -> Option<Duration> {
        positive(self.timeout)
    }

    /// The open-to-half-open delay, if automatic reset is enabled.
    pub fn reset_timeout_duration(&self) -> Option<Duration> {
        u64::try_from(self.reset_timeout)
            .ok()
            .map(Duration::from_millis)
    }

    /// The snapshot period, if periodic notifications are enabled.
    pub fn notification_period_duration(&self) -> Option<Duration> {
        positive(self.notification_period)
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    name: String,
    options: BreakerOptions,
    node_id: Option<String>,
    fallback: Option<FallbackFn<T, E>>,
    metric_sink: Arc<dyn MetricSink>,
    notification_sink: Arc<dyn NotificationSink>,
    timer: Option<Arc<dyn TimerService>>,
    hook_registry: HookRegistry,
}

impl<T, E> BreakerBuilder<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BreakerOptions::default(),
            node_id: None,
            fallback: None,
            metric_sink: Arc::new(NullMetricSink),
            notification_sink: Arc::new(NullNotificationSink),
            timer: None,
            hook_registry: HookRegistry::new(),
        }
    }

    /// Replaces every option at once.
    pub fn options(mut self, options: BreakerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the number of consecutive failures that opens the circuit.
    pub fn max_failures(mut self, count: u32) -> Self {
        self.options.max_failures = count;
        self
    }

    /// Sets the deadline for admitted calls.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.options.timeout = millis(duration);
        self
    }

    /// Lets admitted calls run for as long as they take.
    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = 0;
        self
    }

    /// Sets the delay before an open circuit admits a trial call.
    pub fn reset_timeout(mut self, duration: Duration) -> Self {
        self.options.reset_timeout = millis(duration);
        self
    }

    /// Keeps an open circuit open until it is reset by hand.
    pub fn no_auto_reset(mut self) -> Self {
        self.options.reset_timeout = -1;
        self
    }

    /// Routes operation failures through the fallback, not only rejections.
    pub fn fallback_on_failure(mut self, enabled: bool) -> Self {
        self.options.fallback_on_failure = enabled;
        self
    }

    /// Sets the default fallback.
    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&BreakerError<E>) -> Result<T, E> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    /// Enables notifications to `address`.
    pub fn notification_address(mut self, address: impl Into<String>) -> Self {
        self.options.notification_address = Some(address.into());
        self
    }

    /// Sets the period of unsolicited snapshots; zero disables them.
    pub fn notification_period(mut self, period: Duration) -> Self {
        self.options.notification_period = millis(period);
        self
    }

    /// Sets the collaborator that carries notifications.
    pub fn notification_sink<S: NotificationSink>(mut self, sink: S) -> Self {
        self.notification_sink = Arc::new(sink);
        self
    }

    /// Overrides the node identifier carried by notifications.
    pub fn node_id(mut self, node: impl Into<String>) -> Self {
        self.node_id = Some(node.into());
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets the timer service used for reset and notification scheduling.
    ///
    /// Defaults to a [`TokioTimer`] bound to the runtime current at
    /// [`build`](Self::build).
    pub fn timer<S: TimerService>(mut self, timer: S) -> Self {
        self.timer = Some(Arc::new(timer));
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = hooks;
        self
    }

    /// Builds a new circuit breaker with the configured settings.
    pub fn build(self) -> CircuitBreaker<T, E> {
        let node_id = self
            .node_id
            .unwrap_or_else(|| local_node_id().to_string());
        let timer = self
            .timer
            .unwrap_or_else(|| Arc::new(TokioTimer::new()) as Arc<dyn TimerService>);

        CircuitBreaker::from_parts(crate::breaker::BreakerParts {
            name: self.name,
            options: self.options,
            node_id,
            fallback: self.fallback,
            metric_sink: self.metric_sink,
            notification_sink: self.notification_sink,
            timer,
            hooks: self.hook_registry,
        })
    }
}
