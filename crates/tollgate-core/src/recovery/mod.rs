//! Resilience primitives: rate limiting, circuit breaking and retry
//!
//! Each primitive is usable on its own. The [`crate::pipeline`] module
//! composes them into the fixed order every tool invocation goes through.

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use backoff::{
    BackoffKind, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff, NoBackoff,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{
    Bucket, CounterStore, InMemoryStore, KeyMode, NoopStore, RateLimitAlgorithm, RateLimitConfig,
    RateLimitError, RateLimitStats, RateLimiter, StoreError, StoreSettings, ToolRateLimit,
};
pub use retry::{RetryConfig, RetryError, RetryExecutor, RetryFailure, RetryOptions};

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::TollgateError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Store(_))
    }
}
