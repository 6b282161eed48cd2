//! Rate limiting for tool invocations
//!
//! Fixed-window counters per key, stored behind the [`CounterStore`] trait.

mod keys;
mod limiter;
mod memory;
mod store;
mod types;


pub use keys::{extract_tool_name, generate_key};
pub use limiter::RateLimiter;
pub use memory::{InMemoryStore, StoreSettings};
pub use store::{Bucket, CounterStore, NoopStore};
pub use types::{
    KeyMode, RateLimitAlgorithm, RateLimitConfig, RateLimitError, RateLimitStats, StoreError,
    ToolRateLimit,
};

#[cfg(test)]
pub(crate) use store::MockCounterStore;
