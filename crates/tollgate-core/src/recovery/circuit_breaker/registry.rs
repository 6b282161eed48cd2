//! Circuit breaker registry, one breaker per protected operation name

use dashmap::DashMap;
use std::sync::Arc;

use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerStats};
use crate::error::{TollgateError, TollgateResult};
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Lazily created, shared circuit breakers keyed by operation name
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: CircuitBreakerConfig::default(),
            metrics: Arc::new(TracingMetrics),
        }
    }

    /// Create a registry with a custom default config
    pub fn with_config(config: CircuitBreakerConfig) -> TollgateResult<Self> {
        config.validate()?;
        Ok(Self {
            default_config: config,
            ..Self::new()
        })
    }

    /// Attach a metrics sink to every breaker created from now on
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create the breaker for `name` using the default config
    pub fn get(&self, name: &str) -> TollgateResult<Arc<CircuitBreaker>> {
        self.get_with_config(name, &self.default_config)
    }

    /// Get or create the breaker for `name`.
    ///
    /// `config` only applies when the breaker does not exist yet.
    pub fn get_with_config(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
    ) -> TollgateResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(existing.clone());
        }
        if name.trim().is_empty() {
            return Err(TollgateError::config("circuit breaker name must not be empty"));
        }
        config.validate()?;

        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(circuit = %name, "creating circuit breaker");
                Arc::new(CircuitBreaker::from_parts(
                    name.to_string(),
                    config.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone();
        Ok(breaker)
    }

    /// Look up an existing breaker without creating one
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    /// Breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stats for every breaker, sorted by name
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> =
            self.breakers.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("default_config", &self.default_config)
            .finish()
    }
}
