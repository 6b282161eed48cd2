//! Circuit breaker types and configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{TollgateError, TollgateResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, operations proceed normally
    Closed,
    /// Circuit is open, operations are rejected
    Open,
    /// Circuit is half-open, limited operations allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in the closed state before opening the circuit
    pub max_failures: u32,
    /// Time since the last failure before an open circuit admits a trial
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
    /// Successful trials needed in the half-open state to close again
    pub max_half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout: Duration::from_secs(30),
            max_half_open_trials: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(max_failures: u32, open_timeout: Duration, max_half_open_trials: u32) -> Self {
        Self {
            max_failures,
            open_timeout,
            max_half_open_trials,
        }
    }

    /// Create a config for aggressive circuit breaking
    pub fn aggressive() -> Self {
        Self {
            max_failures: 3,
            open_timeout: Duration::from_secs(15),
            max_half_open_trials: 1,
        }
    }

    /// Create a config for lenient circuit breaking
    pub fn lenient() -> Self {
        Self {
            max_failures: 10,
            open_timeout: Duration::from_secs(60),
            max_half_open_trials: 5,
        }
    }

    pub fn validate(&self) -> TollgateResult<()> {
        if self.max_failures == 0 {
            return Err(TollgateError::config(
                "circuit breaker max_failures must be greater than 0",
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(TollgateError::config(
                "circuit breaker open_timeout must be greater than 0",
            ));
        }
        if self.max_half_open_trials == 0 {
            return Err(TollgateError::config(
                "circuit breaker max_half_open_trials must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Error from circuit breaker operations
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call without running it
    Open {
        name: String,
        state: CircuitState,
        /// Remaining open time, when the breaker is fully open
        retry_after: Option<Duration>,
    },
    /// The operation ran and failed
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Map the wrapped operation error
    pub fn map_err<F, O>(self, f: O) -> CircuitBreakerError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::Open {
                name,
                state,
                retry_after,
            } => CircuitBreakerError::Open {
                name,
                state,
                retry_after,
            },
            Self::OperationFailed(e) => CircuitBreakerError::OperationFailed(f(e)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open {
                name,
                state: CircuitState::HalfOpen,
                ..
            } => write!(
                f,
                "Circuit breaker '{}' is half-open and at its trial limit",
                name
            ),
            Self::Open { name, .. } => write!(f, "Circuit breaker '{}' is open", name),
            Self::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::OperationFailed(e) => Some(e),
        }
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Time since the last recorded failure
    #[serde(with = "humantime_serde")]
    pub since_last_failure: Option<Duration>,
}

impl CircuitBreakerStats {
    /// Calculate failure rate as a percentage
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.total_failures as f64 / self.total_calls as f64) * 100.0
        }
    }
}
