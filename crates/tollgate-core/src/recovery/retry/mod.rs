//! Retry with pluggable backoff

mod config;
mod executor;


pub use config::RetryConfig;
pub use executor::{RetryError, RetryExecutor, RetryFailure, RetryOptions};
