//! Per-operation resilience policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TollgateError, TollgateResult};
use crate::recovery::circuit_breaker::CircuitBreakerConfig;
use crate::recovery::retry::RetryConfig;

/// How one operation is protected
///
/// `retry: None` calls the handler once. The timeout bounds the whole trial,
/// retries and backoff included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationPolicy {
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry: Some(RetryConfig::default()),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl OperationPolicy {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn validate(&self) -> TollgateResult<()> {
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(TollgateError::config("operation timeout must be greater than 0"));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        self.circuit_breaker.validate()
    }
}
