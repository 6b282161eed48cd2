//! In-process counters fed by the metrics sink hooks

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Use parking_lot::RwLock for synchronous, non-blocking access
use parking_lot::RwLock;
use serde::Serialize;

use super::sink::MetricsSink;
use crate::recovery::circuit_breaker::CircuitState;
use crate::recovery::rate_limiter::StoreError;

/// Counter keyed by a fixed number of label values
#[derive(Debug)]
struct LabeledCounter<const N: usize> {
    name: &'static str,
    label_names: [&'static str; N],
    counters: RwLock<HashMap<[String; N], AtomicU64>>,
}

impl<const N: usize> LabeledCounter<N> {
    fn new(name: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            label_names,
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn inc(&self, labels: [&str; N]) {
        let labels: [String; N] = labels.map(str::to_string);
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(&labels) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.counters
            .write()
            .entry(labels)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, labels: [&str; N]) -> u64 {
        let labels: [String; N] = labels.map(str::to_string);
        self.counters
            .read()
            .get(&labels)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render every series as `name{label="value",...}`
    fn export(&self, out: &mut BTreeMap<String, u64>) {
        for (labels, counter) in self.counters.read().iter() {
            let rendered = self
                .label_names
                .iter()
                .zip(labels.iter())
                .map(|(k, v)| format!("{}=\"{}\"", k, v))
                .collect::<Vec<_>>()
                .join(",");
            out.insert(
                format!("{}{{{}}}", self.name, rendered),
                counter.load(Ordering::Relaxed),
            );
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub series: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn get(&self, series: &str) -> u64 {
        self.series.get(series).copied().unwrap_or(0)
    }
}

/// Metrics sink that keeps counters in memory
///
/// Rate-limit decisions are counted per outcome only, not per key, so the
/// number of series stays bounded however many clients connect.
#[derive(Debug)]
pub struct InMemoryMetrics {
    circuit_transitions: LabeledCounter<2>,
    circuit_calls: LabeledCounter<2>,
    rate_limit_decisions: LabeledCounter<1>,
    store_errors: AtomicU64,
    retry_attempts: LabeledCounter<1>,
    retry_successes: LabeledCounter<1>,
    retry_exhaustions: LabeledCounter<1>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self {
            circuit_transitions: LabeledCounter::new("circuit_transitions_total", ["circuit", "to"]),
            circuit_calls: LabeledCounter::new("circuit_calls_total", ["circuit", "outcome"]),
            rate_limit_decisions: LabeledCounter::new("rate_limit_decisions_total", ["outcome"]),
            store_errors: AtomicU64::new(0),
            retry_attempts: LabeledCounter::new("retry_attempts_total", ["operation"]),
            retry_successes: LabeledCounter::new("retry_successes_total", ["operation"]),
            retry_exhaustions: LabeledCounter::new("retry_exhaustions_total", ["operation"]),
        }
    }

    pub fn circuit_transitions(&self, name: &str, to: CircuitState) -> u64 {
        self.circuit_transitions.get([name, to.as_str()])
    }

    pub fn circuit_rejections(&self, name: &str) -> u64 {
        self.circuit_calls.get([name, "rejected"])
    }

    pub fn rate_limit_rejections(&self) -> u64 {
        self.rate_limit_decisions.get(["rejected"])
    }

    pub fn rate_limit_admissions(&self) -> u64 {
        self.rate_limit_decisions.get(["allowed"])
    }

    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    pub fn retry_attempts(&self, operation: &str) -> u64 {
        self.retry_attempts.get([operation])
    }

    pub fn retry_exhaustions(&self, operation: &str) -> u64 {
        self.retry_exhaustions.get([operation])
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut series = BTreeMap::new();
        self.circuit_transitions.export(&mut series);
        self.circuit_calls.export(&mut series);
        self.rate_limit_decisions.export(&mut series);
        self.retry_attempts.export(&mut series);
        self.retry_successes.export(&mut series);
        self.retry_exhaustions.export(&mut series);
        series.insert(
            "rate_limit_store_errors_total".to_string(),
            self.store_errors(),
        );
        MetricsSnapshot { series }
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome(allowed: bool) -> &'static str {
    if allowed { "allowed" } else { "rejected" }
}

impl MetricsSink for InMemoryMetrics {
    fn circuit_transition(&self, name: &str, _from: CircuitState, to: CircuitState) {
        self.circuit_transitions.inc([name, to.as_str()]);
    }

    fn circuit_call(&self, name: &str, allowed: bool) {
        self.circuit_calls.inc([name, outcome(allowed)]);
    }

    fn rate_limit_decision(&self, _key: &str, allowed: bool, _current: u64, _limit: u64) {
        self.rate_limit_decisions.inc([outcome(allowed)]);
    }

    fn rate_limit_store_error(&self, _key: &str, _error: &StoreError) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn retry_attempt(&self, operation: &str, _attempt: u32, _delay: Duration) {
        self.retry_attempts.inc([operation]);
    }

    fn retry_succeeded(&self, operation: &str, _attempts: u32) {
        self.retry_successes.inc([operation]);
    }

    fn retry_exhausted(&self, operation: &str, _attempts: u32) {
        self.retry_exhaustions.inc([operation]);
    }
}
