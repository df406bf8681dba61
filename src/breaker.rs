//! Core circuit breaker implementation.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{BreakerBuilder, BreakerOptions};
use crate::dispatch::{BreakerEvent, Dispatcher};
use crate::error::{BreakerError, BreakerResult};
use crate::fallback::{self, FallbackFn};
use crate::hook::HookRegistry;
use crate::metrics::MetricSink;
use crate::notification::{NotificationEmitter, NotificationSink};
use crate::outcome::CallOutcome;
use crate::state::{State, StateMachine, Ticket, Transition};
use crate::timer::{TimerHandle, TimerService};

/// Everything a breaker is assembled from; produced by the builder.
pub(crate) struct BreakerParts<T, E> {
    pub(crate) name: String,
    pub(crate) options: BreakerOptions,
    pub(crate) node_id: String,
    pub(crate) fallback: Option<FallbackFn<T, E>>,
    pub(crate) metric_sink: Arc<dyn MetricSink>,
    pub(crate) notification_sink: Arc<dyn NotificationSink>,
    pub(crate) timer: Arc<dyn TimerService>,
    pub(crate) hooks: HookRegistry,
}

/// Mutable bookkeeping, only touched under the core lock.
struct Core {
    machine: StateMachine,
    reset_timer: Option<TimerHandle>,
    periodic: Option<TimerHandle>,
    disposed: bool,
}

impl Core {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reset_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.periodic.take() {
            timer.cancel();
        }
    }
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<T, E> {
    name: String,
    options: BreakerOptions,
    core: Mutex<Core>,
    fallback: RwLock<Option<FallbackFn<T, E>>>,
    hooks: HookRegistry,
    emitter: NotificationEmitter,
    dispatcher: Dispatcher,
    metric_sink: Arc<dyn MetricSink>,
    timer: Arc<dyn TimerService>,
}

impl<T, E> Drop for BreakerInner<T, E> {
    fn drop(&mut self) {
        self.core.get_mut().cancel_timers();
    }
}

/// A named circuit breaker guarding asynchronous operations that yield
/// `Result<T, E>`.
///
/// Clones share the same state machine.
pub struct CircuitBreaker<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    inner: Arc<BreakerInner<T, E>>,
}

/// An admitted call that has not reported yet.
///
/// Dropping it unreported gives the admission back, freeing the half-open
/// trial slot if it held it.
struct Permit<'a, T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    breaker: &'a CircuitBreaker<T, E>,
    ticket: Option<Ticket>,
}

impl<T, E> Permit<'_, T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn complete(mut self, outcome: CallOutcome) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.record(ticket, outcome);
        }
    }
}

impl<T, E> Drop for Permit<'_, T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.release(ticket);
        }
    }
}

impl<T, E> CircuitBreaker<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Creates a breaker from plain options, with no sinks or fallback attached.
    pub fn new(name: impl Into<String>, options: BreakerOptions) -> Self {
        Self::builder(name).options(options).build()
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder<T, E> {
        BreakerBuilder::new(name)
    }

    pub(crate) fn from_parts(parts: BreakerParts<T, E>) -> Self {
        info!(
            breaker = %parts.name,
            max_failures = parts.options.max_failures,
            timeout_ms = parts.options.timeout,
            reset_timeout_ms = parts.options.reset_timeout,
            notifications = parts.options.notification_address.is_some(),
            "circuit breaker initialized"
        );

        let inner = BreakerInner {
            core: Mutex::new(Core {
                machine: StateMachine::new(parts.options.max_failures),
                reset_timer: None,
                periodic: None,
                disposed: false,
            }),
            emitter: NotificationEmitter::new(
                parts.options.notification_address.clone(),
                parts.node_id,
                parts.notification_sink,
            ),
            name: parts.name,
            options: parts.options,
            fallback: RwLock::new(parts.fallback),
            hooks: parts.hooks,
            dispatcher: Dispatcher::new(),
            metric_sink: parts.metric_sink,
            timer: parts.timer,
        };

        let breaker = Self {
            inner: Arc::new(inner),
        };
        breaker.start_periodic_notifications();
        breaker
    }

    fn from_weak(weak: &Weak<BreakerInner<T, E>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The options the breaker was built with.
    pub fn options(&self) -> &BreakerOptions {
        &self.inner.options
    }

    /// Gets the current state of the circuit breaker.
    pub fn state(&self) -> State {
        self.inner.core.lock().machine.state()
    }

    /// Consecutive failures recorded since the count was last cleared.
    pub fn failure_count(&self) -> u32 {
        self.inner.core.lock().machine.failures()
    }

    /// Time elapsed since the last state transition.
    pub fn time_in_state(&self) -> Duration {
        self.inner.core.lock().machine.time_in_state()
    }

    /// Sets the default fallback used by [`execute`](Self::execute).
    pub fn set_fallback<F>(&self, f: F)
    where
        F: Fn(&BreakerError<E>) -> Result<T, E> + Send + Sync + 'static,
    {
        *self.inner.fallback.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit opens.
    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.set_on_open(f);
    }

    /// Sets the hook to call when the circuit closes.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.set_on_close(f);
    }

    /// Sets the hook to call when the circuit half-opens.
    pub fn on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.set_on_half_open(f);
    }

    /// Runs `operation` under the breaker, using the default fallback.
    ///
    /// The operation is only invoked if the call is admitted. With a timeout
    /// configured, an operation still pending at the deadline is dropped and
    /// the call resolves to [`BreakerError::Timeout`].
    pub async fn execute<F, Fut>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fallback = self.inner.fallback.read().clone();
        self.run(operation, fallback.as_deref()).await
    }

    /// Runs `operation` under the breaker with a call-specific fallback.
    pub async fn execute_with_fallback<F, Fut, Fb>(
        &self,
        operation: F,
        fallback: Fb,
    ) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce(&BreakerError<E>) -> Result<T, E>,
    {
        self.run(operation, Some(fallback)).await
    }

    /// Like [`execute`](Self::execute), but delivers the outcome into a
    /// result handle the caller already gave out.
    pub async fn execute_and_report<F, Fut>(
        &self,
        operation: F,
        target: oneshot::Sender<BreakerResult<T, E>>,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.execute(operation).await;
        if target.send(result).is_err() {
            debug!(breaker = %self.inner.name, "result receiver dropped before completion");
        }
    }

    async fn run<F, Fut, Fb>(&self, operation: F, fallback: Option<Fb>) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce(&BreakerError<E>) -> Result<T, E>,
    {
        let inner = &self.inner;

        let Some(permit) = self.admit() else {
            inner.metric_sink.record_rejection(&inner.name);
            debug!(breaker = %inner.name, "call rejected by open circuit");
            let error = BreakerError::Open {
                name: inner.name.clone(),
            };
            return fallback::resolve(&inner.name, inner.metric_sink.as_ref(), error, fallback);
        };

        let start = Instant::now();
        let result = match inner.options.timeout_duration() {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(BreakerError::Operation),
                Err(_) => {
                    debug!(breaker = %inner.name, timeout = ?limit, "operation timed out");
                    Err(BreakerError::Timeout(limit))
                }
            },
            None => operation().await.map_err(BreakerError::Operation),
        };

        let outcome = CallOutcome::classify(&result);
        inner
            .metric_sink
            .record_call(&inner.name, outcome, start.elapsed());
        permit.complete(outcome);

        match result {
            Err(error) if inner.options.fallback_on_failure => {
                fallback::resolve(&inner.name, inner.metric_sink.as_ref(), error, fallback)
            }
            result => result,
        }
    }

    fn admit(&self) -> Option<Permit<'_, T, E>> {
        let ticket = self.inner.core.lock().machine.admit()?;
        Some(Permit {
            breaker: self,
            ticket: Some(ticket),
        })
    }

    fn record(&self, ticket: Ticket, outcome: CallOutcome) {
        {
            let mut core = self.inner.core.lock();
            if ticket.epoch != core.machine.epoch() {
                debug!(
                    breaker = %self.inner.name,
                    outcome = outcome.as_str(),
                    "outcome arrived after a transition, ignored"
                );
                return;
            }

            let transition = if outcome.is_success() {
                core.machine.on_success(ticket)
            } else {
                core.machine.on_failure(ticket)
            };
            if let Some(transition) = transition {
                self.apply(&mut core, transition);
            }
        }
        self.dispatch();
    }

    fn release(&self, ticket: Ticket) {
        self.inner.core.lock().machine.release(ticket);
        debug!(
            breaker = %self.inner.name,
            trial = ticket.trial,
            "admitted call dropped before completing"
        );
    }

    /// Forces the circuit open. Returns false if it already was.
    ///
    /// Any pending reset timer is replaced by a fresh one.
    pub fn force_open(&self) -> bool {
        let changed = {
            let mut core = self.inner.core.lock();
            match core.machine.force_open() {
                Some(transition) => {
                    self.apply(&mut core, transition);
                    true
                }
                None => false,
            }
        };
        self.dispatch();
        changed
    }

    /// Forces the circuit closed and clears the failure count.
    ///
    /// Returns false if the circuit was already closed; the count is cleared
    /// either way.
    pub fn force_closed(&self) -> bool {
        let changed = {
            let mut core = self.inner.core.lock();
            match core.machine.force_closed() {
                Some(transition) => {
                    self.apply(&mut core, transition);
                    true
                }
                None => false,
            }
        };
        self.dispatch();
        changed
    }

    /// Returns the breaker to its initial condition: closed, no failures, no
    /// pending reset timer.
    pub fn reset(&self) {
        self.force_closed();
    }

    /// Stops every timer owned by the breaker.
    ///
    /// Calls already admitted still complete and are recorded; an open
    /// circuit stays open until forced closed.
    pub fn dispose(&self) {
        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        core.disposed = true;
        core.cancel_timers();
        info!(breaker = %self.inner.name, "circuit breaker disposed");
    }

    /// Applies a transition while the core lock is held.
    fn apply(&self, core: &mut Core, transition: Transition) {
        if let Some(timer) = core.reset_timer.take() {
            timer.cancel();
        }

        if transition.to == State::Open && !core.disposed {
            if let Some(delay) = self.inner.options.reset_timeout_duration() {
                let weak = Arc::downgrade(&self.inner);
                let armed_epoch = core.machine.epoch();
                core.reset_timer = Some(self.inner.timer.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(breaker) = Self::from_weak(&weak) {
                            breaker.attempt_reset(armed_epoch);
                        }
                    }),
                ));
            }
        }

        self.inner
            .dispatcher
            .push(BreakerEvent::Transition(transition));
    }

    fn attempt_reset(&self, armed_epoch: u64) {
        {
            let mut core = self.inner.core.lock();
            if core.machine.epoch() == armed_epoch {
                // This timer has fired; nothing left to cancel.
                core.reset_timer = None;
            }
            if let Some(transition) = core.machine.attempt_half_open(armed_epoch) {
                self.apply(&mut core, transition);
            }
        }
        self.dispatch();
    }

    fn start_periodic_notifications(&self) {
        if !self.inner.emitter.is_enabled() {
            return;
        }
        let Some(period) = self.inner.options.notification_period_duration() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.timer.schedule_periodic(
            period,
            Arc::new(move || {
                if let Some(breaker) = Self::from_weak(&weak) {
                    breaker.publish_snapshot();
                }
            }),
        );
        self.inner.core.lock().periodic = Some(handle);
    }

    fn publish_snapshot(&self) {
        {
            let core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            self.inner.dispatcher.push(BreakerEvent::Snapshot {
                state: core.machine.state(),
                failures: core.machine.failures(),
            });
        }
        self.dispatch();
    }

    fn dispatch(&self) {
        self.inner.dispatcher.drain(|event| self.deliver(event));
    }

    fn deliver(&self, event: BreakerEvent) {
        let inner = &self.inner;
        match event {
            BreakerEvent::Transition(transition) => {
                match transition.to {
                    State::Open => warn!(
                        breaker = %inner.name,
                        from = %transition.from,
                        failures = transition.failures,
                        "circuit breaker opened"
                    ),
                    State::HalfOpen => info!(
                        breaker = %inner.name,
                        "circuit breaker half-open, admitting a trial call"
                    ),
                    State::Closed => info!(
                        breaker = %inner.name,
                        from = %transition.from,
                        "circuit breaker closed"
                    ),
                }

                inner.hooks.execute_state_transition_hook(transition.to);
                inner
                    .metric_sink
                    .record_state_transition(&inner.name, transition.from, transition.to);
                inner
                    .emitter
                    .emit(&inner.name, transition.to, transition.failures);
            }
            BreakerEvent::Snapshot { state, failures } => {
                inner.emitter.emit(&inner.name, state, failures);
            }
        }
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<T, E> Clone for CircuitBreaker<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &core.machine.state())
            .field("failures", &core.machine.failures())
            .finish()
    }
}
