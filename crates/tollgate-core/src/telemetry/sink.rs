//! Metrics sink trait and the stock sinks

use std::sync::Arc;
use std::time::Duration;

use crate::recovery::circuit_breaker::CircuitState;
use crate::recovery::rate_limiter::StoreError;

/// Receives resilience events from the breaker, limiter and pipeline.
///
/// Every method has an empty default so a sink only implements what it
/// exports. Calls happen synchronously on the request path and must not block.
pub trait MetricsSink: Send + Sync {
    /// A circuit breaker moved between states
    fn circuit_transition(&self, _name: &str, _from: CircuitState, _to: CircuitState) {}

    /// A circuit breaker admitted or rejected a call
    fn circuit_call(&self, _name: &str, _allowed: bool) {}

    /// The rate limiter took an admission decision for `key`
    fn rate_limit_decision(&self, _key: &str, _allowed: bool, _current: u64, _limit: u64) {}

    /// The counter store failed; the request proceeded (fail open)
    fn rate_limit_store_error(&self, _key: &str, _error: &StoreError) {}

    /// A retry is scheduled after `attempt` failed
    fn retry_attempt(&self, _operation: &str, _attempt: u32, _delay: Duration) {}

    /// An operation succeeded after at least one retry
    fn retry_succeeded(&self, _operation: &str, _attempts: u32) {}

    /// An operation used up every attempt
    fn retry_exhausted(&self, _operation: &str, _attempts: u32) {}
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Sink that turns events into structured `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn circuit_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                tracing::warn!(circuit = %name, from = %from, to = %to, "circuit state changed")
            }
            _ => tracing::info!(circuit = %name, from = %from, to = %to, "circuit state changed"),
        }
    }

    fn circuit_call(&self, name: &str, allowed: bool) {
        if !allowed {
            tracing::debug!(circuit = %name, "call rejected by circuit breaker");
        }
    }

    fn rate_limit_decision(&self, key: &str, allowed: bool, current: u64, limit: u64) {
        if allowed {
            tracing::trace!(key = %key, current, limit, "rate limit admitted");
        } else {
            tracing::info!(key = %key, current, limit, "rate limit exceeded");
        }
    }

    fn rate_limit_store_error(&self, key: &str, error: &StoreError) {
        tracing::warn!(key = %key, error = %error, "rate limit store failed, allowing request");
    }

    fn retry_attempt(&self, operation: &str, attempt: u32, delay: Duration) {
        tracing::debug!(
            operation = %operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying operation"
        );
    }

    fn retry_succeeded(&self, operation: &str, attempts: u32) {
        tracing::info!(operation = %operation, attempts, "operation succeeded after retry");
    }

    fn retry_exhausted(&self, operation: &str, attempts: u32) {
        tracing::warn!(operation = %operation, attempts, "retry attempts exhausted");
    }
}

/// Broadcasts every event to a list of sinks, in order
#[derive(Clone, Default)]
pub struct FanoutMetrics {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetrics {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }

    /// Append a sink
    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutMetrics")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl MetricsSink for FanoutMetrics {
    fn circuit_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        for sink in &self.sinks {
            sink.circuit_transition(name, from, to);
        }
    }

    fn circuit_call(&self, name: &str, allowed: bool) {
        for sink in &self.sinks {
            sink.circuit_call(name, allowed);
        }
    }

    fn rate_limit_decision(&self, key: &str, allowed: bool, current: u64, limit: u64) {
        for sink in &self.sinks {
            sink.rate_limit_decision(key, allowed, current, limit);
        }
    }

    fn rate_limit_store_error(&self, key: &str, error: &StoreError) {
        for sink in &self.sinks {
            sink.rate_limit_store_error(key, error);
        }
    }

    fn retry_attempt(&self, operation: &str, attempt: u32, delay: Duration) {
        for sink in &self.sinks {
            sink.retry_attempt(operation, attempt, delay);
        }
    }

    fn retry_succeeded(&self, operation: &str, attempts: u32) {
        for sink in &self.sinks {
            sink.retry_succeeded(operation, attempts);
        }
    }

    fn retry_exhausted(&self, operation: &str, attempts: u32) {
        for sink in &self.sinks {
            sink.retry_exhausted(operation, attempts);
        }
    }
}
