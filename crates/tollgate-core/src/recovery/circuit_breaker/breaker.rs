//! Circuit breaker implementation

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState};
use crate::error::{TollgateError, TollgateResult};
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Mutable breaker state, only ever touched under the breaker's mutex
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_at: Option<Instant>,
    /// Bumped on every transition so late results from an earlier phase are ignored
    generation: u64,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure_at: None,
            generation: 0,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn since_last_failure(&self, now: Instant) -> Option<Duration> {
        self.last_failure_at.map(|at| now.saturating_duration_since(at))
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

/// Proof of admission handed to a running trial
#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    half_open: bool,
}

enum Admission {
    Allowed(Ticket),
    Rejected {
        state: CircuitState,
        retry_after: Option<Duration>,
    },
}

/// Releases a half-open trial slot if the call future is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Option<Ticket>,
}

impl TrialGuard<'_> {
    fn finish(mut self, success: bool) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.complete(ticket, Some(success));
        }
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.complete(ticket, None);
        }
    }
}

/// Circuit breaker guarding one logical operation
///
/// All state lives behind a single mutex. The lazy Open -> HalfOpen check and
/// the admission decision happen in one critical section, so two concurrent
/// callers can never both claim the last trial slot.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker, validating the name and config
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> TollgateResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TollgateError::config("circuit breaker name must not be empty"));
        }
        config.validate()?;
        Ok(Self::from_parts(name, config, Arc::new(TracingMetrics)))
    }

    pub(crate) fn from_parts(
        name: String,
        config: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new()),
            metrics,
        }
    }

    /// Report transitions and call decisions to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the open-timeout check first
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.expire_open(&mut inner, Instant::now());
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Run `operation` through the breaker.
    ///
    /// Returns [`CircuitBreakerError::Open`] without calling `operation` when
    /// the breaker refuses the call. Any error from `operation` counts as a
    /// failure.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = match self.admit() {
            Admission::Allowed(ticket) => ticket,
            Admission::Rejected { state, retry_after } => {
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    state,
                    retry_after,
                });
            }
        };

        let guard = TrialGuard {
            breaker: self,
            ticket: Some(ticket),
        };

        match operation().await {
            Ok(value) => {
                guard.finish(true);
                Ok(value)
            }
            Err(e) => {
                guard.finish(false);
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            self.apply_success(&mut inner)
        };
        self.notify(transition);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            self.apply_failure(&mut inner, Instant::now())
        };
        self.notify(transition);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_successes: inner.half_open_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            since_last_failure: inner.since_last_failure(Instant::now()),
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure_at = None;
            Self::transition(&mut inner, CircuitState::Closed)
        };
        tracing::info!(circuit = %self.name, "circuit breaker manually reset");
        self.notify(Some(transition));
    }

    /// Force the circuit open, starting a fresh open timeout
    pub fn trip(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure_at = Some(Instant::now());
            Self::transition(&mut inner, CircuitState::Open)
        };
        tracing::warn!(circuit = %self.name, "circuit breaker manually tripped");
        self.notify(Some(transition));
    }

    fn admit(&self) -> Admission {
        let now = Instant::now();
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.expire_open(&mut inner, now);

            let admission = match inner.state {
                CircuitState::Closed => Admission::Allowed(Ticket {
                    generation: inner.generation,
                    half_open: false,
                }),
                CircuitState::HalfOpen => {
                    if inner.half_open_successes + inner.half_open_in_flight
                        < self.config.max_half_open_trials
                    {
                        inner.half_open_in_flight += 1;
                        Admission::Allowed(Ticket {
                            generation: inner.generation,
                            half_open: true,
                        })
                    } else {
                        Admission::Rejected {
                            state: CircuitState::HalfOpen,
                            retry_after: None,
                        }
                    }
                }
                CircuitState::Open => {
                    let elapsed = inner.since_last_failure(now).unwrap_or_default();
                    Admission::Rejected {
                        state: CircuitState::Open,
                        retry_after: Some(self.config.open_timeout.saturating_sub(elapsed)),
                    }
                }
            };

            if matches!(admission, Admission::Rejected { .. }) {
                inner.total_rejections += 1;
            }
            (admission, transition)
        };

        self.notify(transition);
        self.metrics
            .circuit_call(&self.name, matches!(admission, Admission::Allowed(_)));
        admission
    }

    /// Route the outcome of an admitted trial. `None` means the trial was abandoned.
    fn complete(&self, ticket: Ticket, outcome: Option<bool>) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != ticket.generation {
                // The breaker moved on while this trial ran and its slot was already
                // reset. A failure landing while open still pushes the timeout back.
                if outcome == Some(false) && inner.state == CircuitState::Open {
                    self.apply_failure(&mut inner, Instant::now());
                } else {
                    tracing::debug!(circuit = %self.name, "ignoring result from an earlier circuit phase");
                }
                return;
            }
            if ticket.half_open {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
            match outcome {
                Some(true) => self.apply_success(&mut inner),
                Some(false) => self.apply_failure(&mut inner, Instant::now()),
                None => None,
            }
        };
        self.notify(transition);
    }

    fn apply_success(&self, inner: &mut BreakerState) -> Option<Transition> {
        inner.total_calls += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                tracing::debug!(
                    circuit = %self.name,
                    successes = inner.half_open_successes,
                    required = self.config.max_half_open_trials,
                    "half-open trial succeeded"
                );
                if inner.half_open_successes >= self.config.max_half_open_trials {
                    Some(Self::transition(inner, CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Open => Some(Self::transition(inner, CircuitState::Closed)),
        }
    }

    fn apply_failure(&self, inner: &mut BreakerState, now: Instant) -> Option<Transition> {
        inner.total_calls += 1;
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.max_failures {
                    Some(Self::transition(inner, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(Self::transition(inner, CircuitState::Open)),
            CircuitState::Open => None,
        }
    }

    /// Lazy Open -> HalfOpen once the open timeout has passed since the last failure
    fn expire_open(&self, inner: &mut BreakerState, now: Instant) -> Option<Transition> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner.since_last_failure(now).unwrap_or(Duration::MAX);
        if elapsed >= self.config.open_timeout {
            Some(Self::transition(inner, CircuitState::HalfOpen))
        } else {
            None
        }
    }

    fn transition(inner: &mut BreakerState, to: CircuitState) -> Transition {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        inner.generation = inner.generation.wrapping_add(1);
        Transition { from, to }
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        if from == to {
            return;
        }
        self.metrics.circuit_transition(&self.name, from, to);
    }
}
