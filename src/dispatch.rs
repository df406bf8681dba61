//! Ordered delivery of breaker events outside the state lock.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::state::{State, Transition};

/// Something observers must hear about, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakerEvent {
    Transition(Transition),
    Snapshot { state: State, failures: u32 },
}

/// FIFO of pending events with a single active drainer.
///
/// Events are pushed while the breaker's state lock is held, so queue order
/// is transition order. Draining happens after the lock is released; a
/// thread that finds another drainer active leaves its events to it.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    queue: Mutex<VecDeque<BreakerEvent>>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: BreakerEvent) {
        self.queue.lock().push_back(event);
    }

    pub(crate) fn drain<F>(&self, mut deliver: F)
    where
        F: FnMut(BreakerEvent),
    {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }

            {
                let _guard = DrainGuard(&self.draining);
                loop {
                    let batch: SmallVec<[BreakerEvent; 4]> = self.queue.lock().drain(..).collect();
                    if batch.is_empty() {
                        break;
                    }
                    for event in batch {
                        deliver(event);
                    }
                }
            }

            // Someone may have pushed between our last empty check and the release.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(failures: u32) -> BreakerEvent {
        BreakerEvent::Snapshot {
            state: State::Closed,
            failures,
        }
    }

    #[test]
    fn delivers_in_push_order() {
        let dispatcher = Dispatcher::new();
        dispatcher.push(snapshot(1));
        dispatcher.push(snapshot(2));

        let mut seen = Vec::new();
        dispatcher.drain(|event| seen.push(event));
        assert_eq!(seen, vec![snapshot(1), snapshot(2)]);
    }

    #[test]
    fn events_pushed_during_delivery_are_delivered_by_the_active_drainer() {
        let dispatcher = Dispatcher::new();
        dispatcher.push(snapshot(1));

        let mut seen = Vec::new();
        dispatcher.drain(|event| {
            if event == snapshot(1) {
                dispatcher.push(snapshot(2));
                // Re-entrant drain backs off instead of deadlocking.
                dispatcher.drain(|_| panic!("nested drain must not deliver"));
            }
            seen.push(event);
        });

        assert_eq!(seen, vec![snapshot(1), snapshot(2)]);
    }
}
