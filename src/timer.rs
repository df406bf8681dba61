//! Cancellable timers used for reset scheduling and periodic notifications.

use futures::future::abortable;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

/// A one-shot task handed to a [`TimerService`].
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// A repeating task handed to a [`TimerService`].
pub type PeriodicTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Schedules callbacks after a delay.
///
/// Implementations must never run a task inline from `schedule`: the breaker
/// arms timers while holding its own lock.
pub trait TimerService: Send + Sync + 'static {
    /// Runs `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Runs `task` every `period`, first firing one period from now.
    fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> TimerHandle;
}

/// Cancels a scheduled task. Dropping the handle leaves the task scheduled.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Wraps a cancellation action.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle for a task that was never scheduled.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancels the task if it has not run yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Timer service backed by a tokio runtime.
///
/// [`TokioTimer::new`] captures the runtime current at construction, and the
/// breaker builder does so when it builds. Tasks are spawned on that runtime
/// from any thread, so a breaker tripped or forced open outside a runtime
/// context still half-opens on time. Without a captured runtime the one
/// current at scheduling time is used; with neither, the task is not
/// scheduled and a warning is logged.
#[derive(Debug, Default, Clone)]
pub struct TokioTimer {
    handle: Option<Handle>,
}

impl TokioTimer {
    /// Creates a timer bound to the current runtime, if there is one.
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    /// Creates a timer that always schedules on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Whether tasks have a runtime to run on from this thread.
    pub fn is_bound(&self) -> bool {
        self.handle.is_some() || Handle::try_current().is_ok()
    }

    fn spawn<F>(&self, work: F) -> TimerHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let runtime = match self.handle.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                warn!("no tokio runtime available, timer not scheduled");
                return TimerHandle::noop();
            }
        };

        let (work, abort) = abortable(work);
        runtime.spawn(work);
        TimerHandle::new(move || abort.abort())
    }
}

impl TimerService for TokioTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        })
    }

    fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> TimerHandle {
        self.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                task();
            }
        })
    }
}
