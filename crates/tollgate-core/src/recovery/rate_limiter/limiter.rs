//! Fixed-window rate limiter

use chrono::Utc;
use std::sync::Arc;

use super::keys::{extract_tool_name, generate_key};
use super::store::CounterStore;
use super::types::{RateLimitConfig, RateLimitError, RateLimitStats, StoreError};
use crate::error::TollgateResult;
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Admission control over a pluggable [`CounterStore`]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> TollgateResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            metrics: Arc::new(TracingMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Key for `tool` and `client_id` under the configured mode and prefix
    pub fn key_for(&self, tool: &str, client_id: &str) -> String {
        generate_key(&self.config.key_prefix, self.config.key_mode, tool, client_id)
    }

    /// Count one request against `key` and decide whether it may proceed.
    ///
    /// Store failures are returned as-is; callers decide whether to fail open.
    pub async fn allow(&self, key: &str) -> Result<bool, StoreError> {
        if !self.config.enabled {
            return Ok(true);
        }

        let (limit, window) = self.limits_for_key(key);
        let count = self.store.increment(key, window).await?;
        let allowed = count <= limit;

        self.metrics.rate_limit_decision(key, allowed, count, limit);
        if !allowed {
            tracing::debug!(key = %key, count, limit, "rate limit exceeded");
        }
        Ok(allowed)
    }

    /// Rejection describing why `key` was refused
    pub fn rejection(&self, key: &str) -> RateLimitError {
        let (limit, window) = self.limits_for_key(key);
        RateLimitError {
            key: key.to_string(),
            limit,
            window,
            retry_after: window,
        }
    }

    /// Current usage for `key`, without counting a request
    pub async fn stats(&self, key: &str) -> Result<RateLimitStats, StoreError> {
        let (limit, window) = self.limits_for_key(key);
        let current = self.store.get(key).await?;

        let now = Utc::now();
        let reset_time = chrono::Duration::from_std(window)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);

        Ok(RateLimitStats {
            key: key.to_string(),
            limit,
            window,
            current,
            remaining: limit.saturating_sub(current),
            allowed: current < limit,
            reset_time,
        })
    }

    /// Clear the counter for `key`
    pub async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.store.reset(key).await
    }

    fn limits_for_key(&self, key: &str) -> (u64, std::time::Duration) {
        let tool = extract_tool_name(&self.config.key_prefix, key);
        self.config.limits_for(tool)
    }
}
