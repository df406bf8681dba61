//! Circuit breaker state machine implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is admitting a single trial operation to test recovery.
    HalfOpen,
}

impl State {
    /// The wire name of the state, as carried by notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Open => "OPEN",
            State::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of admission handed out by [`StateMachine::admit`].
///
/// The epoch pins the outcome to the state it was admitted under; outcomes
/// from an older epoch are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub(crate) epoch: u64,
    pub(crate) trial: bool,
}

/// A state change produced by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: State,
    pub(crate) to: State,
    pub(crate) failures: u32,
}

/// Consecutive-failure state machine.
///
/// Holds no locks of its own; the owning breaker serializes every call.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: State,
    failures: u32,
    max_failures: u32,
    trial_taken: bool,
    epoch: u64,
    last_transition: Instant,
}

impl StateMachine {
    pub(crate) fn new(max_failures: u32) -> Self {
        Self {
            state: State::Closed,
            failures: 0,
            max_failures: max_failures.max(1),
            trial_taken: false,
            epoch: 0,
            last_transition: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn time_in_state(&self) -> Duration {
        self.last_transition.elapsed()
    }

    /// Decides whether a new call may run.
    pub(crate) fn admit(&mut self) -> Option<Ticket> {
        match self.state {
            State::Closed => Some(Ticket {
                epoch: self.epoch,
                trial: false,
            }),
            State::HalfOpen if !self.trial_taken => {
                self.trial_taken = true;
                Some(Ticket {
                    epoch: self.epoch,
                    trial: true,
                })
            }
            State::HalfOpen | State::Open => None,
        }
    }

    /// Gives back an admission whose call never reported an outcome.
    pub(crate) fn release(&mut self, ticket: Ticket) {
        if ticket.trial && ticket.epoch == self.epoch && self.state == State::HalfOpen {
            self.trial_taken = false;
        }
    }

    /// Returns `None` for stale tickets as well as for successes that leave the state alone.
    pub(crate) fn on_success(&mut self, ticket: Ticket) -> Option<Transition> {
        if ticket.epoch != self.epoch {
            return None;
        }

        match self.state {
            State::Closed => {
                self.failures = 0;
                None
            }
            State::HalfOpen if ticket.trial => {
                self.failures = 0;
                Some(self.move_to(State::Closed))
            }
            State::HalfOpen | State::Open => None,
        }
    }

    pub(crate) fn on_failure(&mut self, ticket: Ticket) -> Option<Transition> {
        if ticket.epoch != self.epoch {
            return None;
        }

        match self.state {
            State::Closed => {
                self.failures = self.failures.saturating_add(1);
                if self.failures >= self.max_failures {
                    Some(self.move_to(State::Open))
                } else {
                    None
                }
            }
            State::HalfOpen if ticket.trial => {
                self.failures = self.failures.saturating_add(1);
                Some(self.move_to(State::Open))
            }
            State::HalfOpen | State::Open => None,
        }
    }

    /// Reset timer fired. Only meaningful while open and only for the epoch the timer was armed in.
    pub(crate) fn attempt_half_open(&mut self, armed_epoch: u64) -> Option<Transition> {
        if self.state != State::Open || armed_epoch != self.epoch {
            return None;
        }

        // A trial starts from a clean count.
        self.failures = 0;
        Some(self.move_to(State::HalfOpen))
    }

    pub(crate) fn force_open(&mut self) -> Option<Transition> {
        if self.state == State::Open {
            return None;
        }

        Some(self.move_to(State::Open))
    }

    pub(crate) fn force_closed(&mut self) -> Option<Transition> {
        self.failures = 0;
        if self.state == State::Closed {
            return None;
        }

        Some(self.move_to(State::Closed))
    }

    fn move_to(&mut self, to: State) -> Transition {
        let from = self.state;
        self.state = to;
        self.trial_taken = false;
        self.epoch = self.epoch.wrapping_add(1);
        self.last_transition = Instant::now();

        Transition {
            from,
            to,
            failures: self.failures,
        }
    }
}
