//! Error types for the circuit breaker library.

use std::time::Duration;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for circuit breaker operations.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open, or the half-open trial slot is already taken.
    #[error("circuit breaker '{name}' is open")]
    Open {
        /// Name of the breaker that rejected the call.
        name: String,
    },

    /// The underlying operation failed.
    #[error("operation error: {0}")]
    Operation(E),

    /// The operation did not complete before the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The fallback computation itself failed.
    #[error("fallback error: {0}")]
    Fallback(E),
}

impl<E> BreakerError<E> {
    /// True when the call was never admitted.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// True when the call was cut off by its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout(_))
    }

    /// True when the operation reported its own error.
    pub fn is_operation(&self) -> bool {
        matches!(self, BreakerError::Operation(_))
    }

    /// True when the fallback failed.
    pub fn is_fallback(&self) -> bool {
        matches!(self, BreakerError::Fallback(_))
    }

    /// The wrapped operation or fallback error, if there is one.
    pub fn inner(&self) -> Option<&E> {
        match self {
            BreakerError::Operation(e) | BreakerError::Fallback(e) => Some(e),
            BreakerError::Open { .. } | BreakerError::Timeout(_) => None,
        }
    }
}

/// Errors produced while loading breaker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("invalid breaker configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value outside its accepted range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Configuration key, as written in the document.
        field: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}
