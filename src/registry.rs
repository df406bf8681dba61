//! Named breakers shared between call sites.

use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::breaker::CircuitBreaker;
use crate::config::BreakerOptions;

/// An owned collection of breakers keyed by name.
///
/// Call sites that look up the same name share one state machine. The
/// registry owns nothing global; drop it or call
/// [`dispose_all`](Self::dispose_all) to stop its breakers' timers.
pub struct BreakerRegistry<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    breakers: RwLock<HashMap<String, CircuitBreaker<T, E>, RandomState>>,
}

impl<T, E> Default for BreakerRegistry<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> BreakerRegistry<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Returns the breaker registered under `name`, creating it from
    /// `options` on first use. Options are ignored for existing breakers.
    pub fn get_or_create(&self, name: &str, options: BreakerOptions) -> CircuitBreaker<T, E> {
        self.get_or_insert_with(name, || CircuitBreaker::new(name, options))
    }

    /// Returns the breaker registered under `name`, building it with `make`
    /// on first use.
    pub fn get_or_insert_with<F>(&self, name: &str, make: F) -> CircuitBreaker<T, E>
    where
        F: FnOnce() -> CircuitBreaker<T, E>,
    {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }

        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(make)
            .clone()
    }

    /// Looks up a breaker by name.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker<T, E>> {
        self.breakers.read().get(name).cloned()
    }

    /// Registers `breaker` under its own name, returning the one it replaced.
    ///
    /// A replaced breaker is disposed.
    pub fn insert(&self, breaker: CircuitBreaker<T, E>) -> Option<CircuitBreaker<T, E>> {
        let replaced = self
            .breakers
            .write()
            .insert(breaker.name().to_string(), breaker);
        if let Some(old) = &replaced {
            old.dispose();
        }
        replaced
    }

    /// Unregisters and disposes the breaker registered under `name`.
    pub fn remove(&self, name: &str) -> Option<CircuitBreaker<T, E>> {
        let removed = self.breakers.write().remove(name);
        if let Some(breaker) = &removed {
            breaker.dispose();
        }
        removed
    }

    /// Names of all registered breakers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// True when no breaker is registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Disposes and unregisters every breaker.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.breakers.write().drain().map(|(_, b)| b).collect();
        for breaker in drained {
            breaker.dispose();
        }
    }
}

impl<T, E> fmt::Debug for BreakerRegistry<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}
