//! Invocation outcome errors

use std::fmt;
use std::time::Duration;

use crate::error::{Cancelled, TollgateError};
use crate::recovery::circuit_breaker::CircuitState;
use crate::recovery::rate_limiter::RateLimitError;
use crate::recovery::retry::RetryError;

/// Why an invocation through the pipeline did not produce a value
#[derive(Debug)]
pub enum PipelineError<E> {
    /// Refused by the rate limiter; the operation never ran
    RateLimited(RateLimitError),
    /// Refused by the circuit breaker; the operation never ran
    CircuitOpen {
        name: String,
        state: CircuitState,
        retry_after: Option<Duration>,
    },
    /// Every retry attempt failed
    RetryExhausted(RetryError<E>),
    Cancelled(Cancelled),
    /// The trial ran past the operation timeout
    Timeout { operation: String, timeout: Duration },
    /// The operation failed without being retried
    Operation(E),
    /// The invocation could not be set up
    Config(TollgateError),
}

impl<E> PipelineError<E> {
    /// The caller should try again later rather than treat this as a failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::CircuitOpen { .. })
    }

    /// Suggested wait before trying again, when known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(e) => Some(e.retry_after),
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The operation's own error, if it ran and failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted(e) => Some(&e.error),
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for PipelineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited(e) => e.fmt(f),
            Self::CircuitOpen {
                name,
                state: CircuitState::HalfOpen,
                ..
            } => write!(f, "circuit '{}' is half-open and busy with trial calls", name),
            Self::CircuitOpen { name, .. } => write!(f, "circuit '{}' is open", name),
            Self::RetryExhausted(e) => e.fmt(f),
            Self::Cancelled(e) => e.fmt(f),
            Self::Timeout { operation, timeout } => {
                write!(f, "operation '{}' timed out after {:?}", operation, timeout)
            }
            Self::Operation(e) => e.fmt(f),
            Self::Config(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PipelineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RateLimited(e) => Some(e),
            Self::RetryExhausted(e) => Some(e),
            Self::Cancelled(e) => Some(e),
            Self::Operation(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::CircuitOpen { .. } | Self::Timeout { .. } => None,
        }
    }
}
