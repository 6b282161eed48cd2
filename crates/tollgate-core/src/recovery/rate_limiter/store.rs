//! Counter store interface
//!
//! The limiter only ever talks to a [`CounterStore`]. The in-process store is
//! [`super::InMemoryStore`]; anything with the same fixed-window semantics can
//! be plugged in instead.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::types::StoreError;

/// Fixed-window counter for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub count: u64,
    pub window: Duration,
    pub window_start: Instant,
    pub last_update: Instant,
}

impl Bucket {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            count: 1,
            window,
            window_start: now,
            last_update: now,
        }
    }

    /// Whether the bucket's window has fully elapsed
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }

    /// Count one request, starting a fresh window if the old one elapsed.
    ///
    /// Returns the count after the increment.
    pub fn hit(&mut self, window: Duration, now: Instant) -> u64 {
        if self.is_expired(now) {
            *self = Self::new(window, now);
        } else {
            self.count = self.count.saturating_add(1);
            self.last_update = now;
        }
        self.count
    }
}

/// Key to count storage with per-key fixed windows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically count one request against `key` and return the new count.
    ///
    /// Creates the bucket at 1 when absent and restarts it at 1 when its
    /// window has elapsed.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Current count for `key`; 0 when absent or expired
    async fn get(&self, key: &str) -> Result<u64, StoreError>;

    /// Zero the count for `key`
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` entirely
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Store that never counts anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

#[async_trait]
impl CounterStore for NoopStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<u64, StoreError> {
        Ok(1)
    }

    async fn get(&self, _key: &str) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn reset(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
