//! Observability hooks for the resilience primitives
//!
//! Components never reach for a global registry. A [`MetricsSink`] is handed
//! to each constructor and its lifetime belongs to the caller.

mod counters;
mod sink;

pub use counters::{InMemoryMetrics, MetricsSnapshot};
pub use sink::{FanoutMetrics, MetricsSink, NoopMetrics, TracingMetrics};
