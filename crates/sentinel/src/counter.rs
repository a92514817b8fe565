//! Shared atomic counter store.
//!
//! Reputation scores live in a counter store so several service instances can
//! share them. Every mutation is a single atomic increment per key.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised by counter stores
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter store operation timed out")]
    Timeout,

    #[error("Counter store lock poisoned")]
    Poisoned,
}

/// Atomic float counters with per-key expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the counter and return the new value.
    /// A missing or expired key starts from zero.
    async fn increment(&self, key: &str, delta: f64) -> Result<f64, CounterError>;

    /// Reset the key's time-to-live
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError>;

    /// Current value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<f64>, CounterError>;

    /// Increment and reset the TTL.
    ///
    /// The default runs the two calls back to back; stores that can do both
    /// in one atomic unit override it.
    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: f64,
        ttl: Duration,
    ) -> Result<f64, CounterError> {
        let value = self.increment(key, delta).await?;
        self.expire(key, ttl).await?;
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: f64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Expired counters are swept at least this often while writes arrive
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Map size that always triggers a sweep
const SWEEP_MIN_LEN: usize = 1024;

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    next_sweep_at: Option<Instant>,
    next_sweep_len: usize,
}

impl Counters {
    fn maybe_sweep(&mut self, now: Instant) {
        let due = self.next_sweep_at.map_or(false, |at| now >= at);
        if due || self.entries.len() >= self.next_sweep_len.max(SWEEP_MIN_LEN) {
            self.entries.retain(|_, counter| counter.is_live(now));
            self.next_sweep_len = self.entries.len() * 2;
            self.next_sweep_at = Some(now + SWEEP_INTERVAL);
        } else if self.next_sweep_at.is_none() {
            self.next_sweep_at = Some(now + SWEEP_INTERVAL);
        }
    }

    /// Live counter for `key`, dropping it when expired
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Counter> {
        if self.entries.get(key).map_or(false, |c| !c.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Process-local counter store
///
/// Expiry follows the tokio clock, so tests can drive it with paused time.
/// Expired counters are dropped when touched and swept periodically on write.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, key: &str, delta: f64, ttl: Option<Duration>) -> Result<f64, CounterError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().map_err(|_| CounterError::Poisoned)?;
        counters.maybe_sweep(now);

        let counter = counters.entries.entry(key.to_string()).or_insert(Counter {
            value: 0.0,
            expires_at: None,
        });
        if !counter.is_live(now) {
            *counter = Counter {
                value: 0.0,
                expires_at: None,
            };
        }

        counter.value += delta;
        if let Some(ttl) = ttl {
            counter.expires_at = Some(now + ttl);
        }
        Ok(counter.value)
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        self.counters.lock().map(|c| c.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, delta: f64) -> Result<f64, CounterError> {
        self.apply(key, delta, None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().map_err(|_| CounterError::Poisoned)?;
        if let Some(counter) = counters.live(key, now) {
            counter.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<f64>, CounterError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().map_err(|_| CounterError::Poisoned)?;
        Ok(counters.live(key, now).map(|counter| counter.value))
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: f64,
        ttl: Duration,
    ) -> Result<f64, CounterError> {
        self.apply(key, delta, Some(ttl))
    }
}
