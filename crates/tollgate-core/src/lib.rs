//! Tollgate core library
//!
//! Resilience primitives for a tool-serving process and the pipeline that
//! composes them: a fixed-window rate limiter over a pluggable counter store,
//! per-operation circuit breakers and a retry executor with configurable
//! backoff. Also hosts configuration loading, the metrics sink and the tool
//! layer the server dispatches through.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types
pub use config::{ConfigLoader, TollgateConfig};
pub use error::{Cancelled, TollgateError, TollgateResult};
pub use pipeline::{Invocation, OperationPolicy, PipelineError, ResiliencePipeline};
pub use recovery::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CounterStore,
    InMemoryStore, KeyMode, RateLimitConfig, RateLimiter, RetryConfig, RetryExecutor, Retryable,
};
pub use telemetry::{InMemoryMetrics, MetricsSink, NoopMetrics, TracingMetrics};
pub use tools::{ToolDispatcher, ToolError, ToolHandler, ToolOutput, ToolRegistry};
