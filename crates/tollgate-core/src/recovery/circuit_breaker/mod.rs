//! Circuit breaker pattern for fault tolerance
//!
//! Stops calling an operation that keeps failing, then lets a bounded number
//! of trial calls through once the open timeout has passed.

mod breaker;
mod registry;
mod types;

#[cfg(test)]
mod tests;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use types::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState};
