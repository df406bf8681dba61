//! Metric sinks for circuit breaker events.

use std::time::Duration;

use crate::outcome::CallOutcome;
use crate::state::State;

/// Trait for metrics sinks that can receive circuit breaker events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a state transition event.
    fn record_state_transition(&self, breaker: &str, from: State, to: State);

    /// Records the classified outcome of an admitted call.
    fn record_call(&self, breaker: &str, outcome: CallOutcome, duration: Duration);

    /// Records a call rejected without running.
    fn record_rejection(&self, breaker: &str);

    /// Records a fallback invocation and whether it produced a value.
    fn record_fallback(&self, breaker: &str, success: bool);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _breaker: &str, _from: State, _to: State) {}
    fn record_call(&self, _breaker: &str, _outcome: CallOutcome, _duration: Duration) {}
    fn record_rejection(&self, _breaker: &str) {}
    fn record_fallback(&self, _breaker: &str, _success: bool) {}
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetricSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use super::*;
    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::registry::Registry;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct BreakerLabels {
        breaker: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        breaker: String,
        from: String,
        to: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CallLabels {
        breaker: String,
        outcome: String,
    }

    /// Exposes breaker events as Prometheus counters.
    #[derive(Clone, Default)]
    pub struct PrometheusMetricSink {
        transitions: Family<TransitionLabels, Counter>,
        calls: Family<CallLabels, Counter>,
        call_seconds: Family<CallLabels, Counter<f64>>,
        rejections: Family<BreakerLabels, Counter>,
        fallbacks: Family<CallLabels, Counter>,
    }

    impl PrometheusMetricSink {
        /// Creates the counter families and registers them.
        pub fn new(registry: &mut Registry) -> Self {
            let sink = Self::default();
            registry.register(
                "circuit_breaker_transitions",
                "State transitions per breaker",
                sink.transitions.clone(),
            );
            registry.register(
                "circuit_breaker_calls",
                "Admitted calls by outcome",
                sink.calls.clone(),
            );
            registry.register(
                "circuit_breaker_call_seconds",
                "Cumulative time spent in admitted calls",
                sink.call_seconds.clone(),
            );
            registry.register(
                "circuit_breaker_rejections",
                "Calls rejected by an open circuit",
                sink.rejections.clone(),
            );
            registry.register(
                "circuit_breaker_fallbacks",
                "Fallback invocations by result",
                sink.fallbacks.clone(),
            );
            sink
        }
    }

    impl MetricSink for PrometheusMetricSink {
        fn record_state_transition(&self, breaker: &str, from: State, to: State) {
            self.transitions
                .get_or_create(&TransitionLabels {
                    breaker: breaker.to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })
                .inc();
        }

        fn record_call(&self, breaker: &str, outcome: CallOutcome, duration: Duration) {
            let labels = CallLabels {
                breaker: breaker.to_string(),
                outcome: outcome.as_str().to_string(),
            };
            self.calls.get_or_create(&labels).inc();
            self.call_seconds
                .get_or_create(&labels)
                .inc_by(duration.as_secs_f64());
        }

        fn record_rejection(&self, breaker: &str) {
            self.rejections
                .get_or_create(&BreakerLabels {
                    breaker: breaker.to_string(),
                })
                .inc();
        }

        fn record_fallback(&self, breaker: &str, success: bool) {
            let outcome = if success { "success" } else { "failure" };
            self.fallbacks
                .get_or_create(&CallLabels {
                    breaker: breaker.to_string(),
                    outcome: outcome.to_string(),
                })
                .inc();
        }
    }
}
