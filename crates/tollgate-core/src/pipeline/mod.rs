//! Resilience pipeline
//!
//! Every invocation goes through the same fixed order:
//!
//! 1. rate limiter admission (store failures fail open),
//! 2. circuit breaker around a single trial,
//! 3. inside the trial, the optional timeout around either the retry
//!    executor or one direct handler call.
//!
//! A whole retried sequence counts as one breaker trial.

mod error;
mod policy;


pub use error::PipelineError;
pub use policy::OperationPolicy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Cancelled, TollgateError, TollgateResult};
use crate::recovery::Retryable;
use crate::recovery::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, CircuitBreakerStats,
};
use crate::recovery::rate_limiter::{
    CounterStore, RateLimitConfig, RateLimitStats, RateLimiter, StoreError,
};
use crate::recovery::retry::{RetryError, RetryExecutor, RetryFailure, RetryOptions};
use crate::telemetry::{MetricsSink, TracingMetrics};

/// Who is calling what
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub tool: &'a str,
    pub client_id: &'a str,
}

impl<'a> Invocation<'a> {
    pub fn new(tool: &'a str, client_id: &'a str) -> Self {
        Self { tool, client_id }
    }
}

/// Policy with its retry executor already built
#[derive(Debug)]
struct ResolvedPolicy {
    policy: OperationPolicy,
    retry: Option<RetryExecutor>,
}

impl ResolvedPolicy {
    fn build(policy: OperationPolicy, metrics: &Arc<dyn MetricsSink>) -> TollgateResult<Self> {
        policy.validate()?;
        let retry = match &policy.retry {
            Some(config) => Some(RetryExecutor::new(config.clone())?.with_metrics(metrics.clone())),
            None => None,
        };
        Ok(Self { policy, retry })
    }
}

/// Failure inside one breaker trial
enum TrialError<E> {
    Exhausted(RetryError<E>),
    Operation(E),
    Cancelled(Cancelled),
    Timeout(Duration),
}

impl<E> From<RetryFailure<E>> for TrialError<E> {
    fn from(failure: RetryFailure<E>) -> Self {
        match failure {
            RetryFailure::Exhausted(e) => Self::Exhausted(e),
            RetryFailure::NotRetryable(e) => Self::Operation(e),
            RetryFailure::Cancelled(c) => Self::Cancelled(c),
        }
    }
}

/// Builder for [`ResiliencePipeline`]
pub struct PipelineBuilder {
    rate_limit: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    default_policy: OperationPolicy,
    policies: HashMap<String, OperationPolicy>,
    metrics: Arc<dyn MetricsSink>,
}

impl PipelineBuilder {
    /// Policy for operations without their own entry
    pub fn default_policy(mut self, policy: OperationPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Policy for one named operation
    pub fn policy(mut self, operation: impl Into<String>, policy: OperationPolicy) -> Self {
        self.policies.insert(operation.into(), policy);
        self
    }

    pub fn policies(mut self, policies: HashMap<String, OperationPolicy>) -> Self {
        self.policies.extend(policies);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate every component config and assemble the pipeline
    pub fn build(self) -> TollgateResult<ResiliencePipeline> {
        let limiter = RateLimiter::new(self.rate_limit, self.store)?.with_metrics(self.metrics.clone());
        let default_policy = ResolvedPolicy::build(self.default_policy, &self.metrics)?;
        let breakers = CircuitBreakerRegistry::with_config(default_policy.policy.circuit_breaker.clone())?
            .with_metrics(self.metrics.clone());

        let mut policies = HashMap::with_capacity(self.policies.len());
        for (name, policy) in self.policies {
            let resolved = ResolvedPolicy::build(policy, &self.metrics).map_err(|e| {
                TollgateError::config(format!("policy for '{}': {}", name, e))
            })?;
            policies.insert(name, resolved);
        }

        Ok(ResiliencePipeline {
            limiter,
            breakers,
            default_policy,
            policies,
            metrics: self.metrics,
        })
    }
}

/// Rate limiter, circuit breakers and retry executors composed per operation
pub struct ResiliencePipeline {
    limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    default_policy: ResolvedPolicy,
    policies: HashMap<String, ResolvedPolicy>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ResiliencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("limiter", &self.limiter)
            .field("breakers", &self.breakers)
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResiliencePipeline {
    pub fn builder(rate_limit: RateLimitConfig, store: Arc<dyn CounterStore>) -> PipelineBuilder {
        PipelineBuilder {
            rate_limit,
            store,
            default_policy: OperationPolicy::default(),
            policies: HashMap::new(),
            metrics: Arc::new(TracingMetrics),
        }
    }

    /// Run `handler` for `invocation` through admission, isolation and recovery.
    ///
    /// `handler` receives the zero-based attempt number. Only the retry loop
    /// observes `cancel`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        invocation: Invocation<'_>,
        cancel: &CancellationToken,
        mut handler: F,
    ) -> Result<T, PipelineError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let tool = invocation.tool;

        let key = self.limiter.key_for(tool, invocation.client_id);
        match self.limiter.allow(&key).await {
            Ok(true) => {}
            Ok(false) => return Err(PipelineError::RateLimited(self.limiter.rejection(&key))),
            Err(error) => self.store_failed(&key, &error),
        }

        let resolved = self.resolve(tool);
        let breaker = self
            .breakers
            .get_with_config(tool, &resolved.policy.circuit_breaker)
            .map_err(PipelineError::Config)?;

        let attempts = async {
            match &resolved.retry {
                Some(executor) => {
                    let options = RetryOptions::named(tool).retry_if(|e: &E| e.is_retryable());
                    executor
                        .execute(cancel, options, &mut handler)
                        .await
                        .map_err(TrialError::from)
                }
                None => handler(0).await.map_err(TrialError::Operation),
            }
        };
        let timeout = resolved.policy.timeout;
        let trial = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, attempts).await {
                    Ok(result) => result,
                    Err(_) => Err(TrialError::Timeout(limit)),
                },
                None => attempts.await,
            }
        };

        match breaker.call(move || trial).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open {
                name,
                state,
                retry_after,
            }) => Err(PipelineError::CircuitOpen {
                name,
                state,
                retry_after,
            }),
            Err(CircuitBreakerError::OperationFailed(failure)) => Err(match failure {
                TrialError::Exhausted(e) => PipelineError::RetryExhausted(e),
                TrialError::Operation(e) => PipelineError::Operation(e),
                TrialError::Cancelled(c) => PipelineError::Cancelled(c),
                TrialError::Timeout(timeout) => {
                    tracing::warn!(operation = %tool, ?timeout, "operation timed out");
                    PipelineError::Timeout {
                        operation: tool.to_string(),
                        timeout,
                    }
                }
            }),
        }
    }

    /// Policy applied to `operation`
    pub fn policy_for(&self, operation: &str) -> &OperationPolicy {
        &self.resolve(operation).policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Breaker for `operation`, if it has been invoked at least once
    pub fn breaker(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.find(operation)
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.all_stats()
    }

    /// Rate-limit usage for `tool` as seen by `client_id`
    pub async fn rate_limit_stats(
        &self,
        tool: &str,
        client_id: &str,
    ) -> Result<RateLimitStats, StoreError> {
        let key = self.limiter.key_for(tool, client_id);
        self.limiter.stats(&key).await
    }

    fn resolve(&self, operation: &str) -> &ResolvedPolicy {
        self.policies.get(operation).unwrap_or(&self.default_policy)
    }

    fn store_failed(&self, key: &str, error: &StoreError) {
        self.metrics.rate_limit_store_error(key, error);
    }
}
