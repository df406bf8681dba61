//! Classification of admitted calls.

use crate::error::BreakerError;

/// Terminal signal of an admitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    /// The operation completed with a value.
    Success,

    /// The operation reported an error.
    Failure,

    /// The deadline elapsed before the operation completed.
    Timeout,
}

impl CallOutcome {
    /// Maps the raw result of an admitted call onto an outcome.
    ///
    /// Open-circuit and fallback errors never come out of an admitted call,
    /// so they classify as plain failures.
    pub fn classify<T, E>(result: &Result<T, BreakerError<E>>) -> Self {
        match result {
            Ok(_) => CallOutcome::Success,
            Err(BreakerError::Timeout(_)) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Failure,
        }
    }

    /// Whether the state machine should record this as a success.
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }

    /// Label used by metric sinks.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
        }
    }
}
