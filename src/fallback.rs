//! Substitute results for rejected or failed calls.

use std::sync::Arc;

use crate::error::{BreakerError, BreakerResult};
use crate::metrics::MetricSink;

/// A fallback computation, given the error that triggered it.
pub type FallbackFn<T, E> = Arc<dyn Fn(&BreakerError<E>) -> Result<T, E> + Send + Sync + 'static>;

/// Turns a triggering error into the effective outcome.
///
/// Without a fallback the error propagates as-is. With one, its value wins,
/// and its own error surfaces as [`BreakerError::Fallback`] with no further
/// chaining.
pub(crate) fn resolve<T, E, F>(
    breaker: &str,
    metrics: &dyn MetricSink,
    error: BreakerError<E>,
    fallback: Option<F>,
) -> BreakerResult<T, E>
where
    F: FnOnce(&BreakerError<E>) -> Result<T, E>,
{
    let Some(fallback) = fallback else {
        return Err(error);
    };

    match fallback(&error) {
        Ok(value) => {
            metrics.record_fallback(breaker, true);
            Ok(value)
        }
        Err(e) => {
            metrics.record_fallback(breaker, false);
            Err(BreakerError::Fallback(e))
        }
    }
}
