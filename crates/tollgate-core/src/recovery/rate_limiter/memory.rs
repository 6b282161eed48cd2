//! In-process counter store with background eviction

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::store::{Bucket, CounterStore};
use super::types::StoreError;
use crate::error::{TollgateError, TollgateResult};

/// Eviction settings for [`InMemoryStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// How often the background sweep runs
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Buckets untouched for this long are dropped by the sweep
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl StoreSettings {
    pub fn validate(&self) -> TollgateResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(TollgateError::config(
                "store cleanup_interval must be greater than 0",
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(TollgateError::config(
                "store idle_timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Counter store backed by a lock-guarded map
///
/// Writes take the exclusive lock for the whole increment-or-reset step; reads
/// share the lock.
#[derive(Debug)]
pub struct InMemoryStore {
    buckets: RwLock<HashMap<String, Bucket>>,
    settings: StoreSettings,
    shutdown: CancellationToken,
}

impl InMemoryStore {
    /// Create a store without a background sweep
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a store and spawn its eviction task on the current runtime.
    ///
    /// The task exits on [`InMemoryStore::shutdown`] or once the last `Arc` is dropped.
    pub fn start(settings: StoreSettings) -> TollgateResult<Arc<Self>> {
        settings.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            TollgateError::store(format!("in-memory store needs a tokio runtime: {}", e))
        })?;

        let store = Arc::new(Self::new(settings));
        let weak = Arc::downgrade(&store);
        let token = store.shutdown.clone();
        let period = store.settings.cleanup_interval;
        handle.spawn(eviction_loop(weak, token, period));

        tracing::debug!(
            cleanup_interval = ?store.settings.cleanup_interval,
            idle_timeout = ?store.settings.idle_timeout,
            "started in-memory counter store"
        );
        Ok(store)
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Drop every bucket idle for longer than the configured timeout.
    ///
    /// Returns how many buckets were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.settings.idle_timeout;
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < idle_timeout);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    /// Stop the eviction task. Counting keeps working.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn eviction_loop(store: Weak<InMemoryStore>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = store.len(), "evicted idle rate limit buckets");
                }
            }
        }
    }
    tracing::debug!("counter store eviction task stopped");
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let count = match buckets.get_mut(key) {
            Some(bucket) => bucket.hit(window, now),
            None => {
                buckets.insert(key.to_string(), Bucket::new(window, now));
                1
            }
        };
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let count = self
            .buckets
            .read()
            .get(key)
            .filter(|bucket| !bucket.is_expired(now))
            .map(|bucket| bucket.count)
            .unwrap_or(0);
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(bucket) = self.buckets.write().get_mut(key) {
            bucket.count = 0;
            bucket.window_start = now;
            bucket.last_update = now;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.buckets.write().remove(key);
        Ok(())
    }
}
