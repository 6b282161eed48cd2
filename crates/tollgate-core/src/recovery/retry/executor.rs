//! Retry executor

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::config::RetryConfig;
use crate::error::{Cancelled, TollgateResult};
use crate::recovery::backoff::BackoffStrategy;
use crate::telemetry::{MetricsSink, TracingMetrics};

type RetryPredicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type RetryObserver<'a, E> = Box<dyn Fn(u32, &E, Duration) + Send + Sync + 'a>;

/// Per-call hooks for [`RetryExecutor::execute`]
pub struct RetryOptions<'a, E> {
    operation: &'a str,
    retry_if: Option<RetryPredicate<'a, E>>,
    on_retry: Option<RetryObserver<'a, E>>,
}

impl<'a, E> RetryOptions<'a, E> {
    pub fn new() -> Self {
        Self {
            operation: "operation",
            retry_if: None,
            on_retry: None,
        }
    }

    /// Name used in logs and metrics
    pub fn named(operation: &'a str) -> Self {
        Self {
            operation,
            ..Self::new()
        }
    }

    /// Only retry errors for which `predicate` returns true
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.retry_if = Some(Box::new(predicate));
        self
    }

    /// Called with `(attempt, error, delay)` before each wait
    pub fn on_retry(mut self, observer: impl Fn(u32, &E, Duration) + Send + Sync + 'a) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    pub fn operation(&self) -> &str {
        self.operation
    }
}

impl<E> Default for RetryOptions<'_, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for RetryOptions<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("operation", &self.operation)
            .field("retry_if", &self.retry_if.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Every attempt failed
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    /// Error from the final attempt
    pub error: E,
    pub attempts: u32,
    pub last_delay: Duration,
    pub total_delay: Duration,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation failed after {} attempts: {}",
            self.attempts, self.error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Why [`RetryExecutor::execute`] gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure<E> {
    /// `max_attempts` attempts all failed
    Exhausted(RetryError<E>),
    /// The retry predicate rejected the error
    NotRetryable(E),
    /// The token fired before an attempt or during a wait
    Cancelled(Cancelled),
}

impl<E> RetryFailure<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The operation's own error, if one was produced
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted(e) => Some(e.error),
            Self::NotRetryable(e) => Some(e),
            Self::Cancelled(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted(e) => e.fmt(f),
            Self::NotRetryable(e) => write!(f, "non-retryable error: {}", e),
            Self::Cancelled(c) => c.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted(e) => Some(e),
            Self::NotRetryable(e) => Some(e),
            Self::Cancelled(c) => Some(c),
        }
    }
}

/// Runs an operation until it succeeds, its error is not retryable, attempts
/// run out, or the caller cancels.
///
/// The executor is immutable and can be shared; attempt counters live on the
/// stack of each call.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    backoff: Arc<dyn BackoffStrategy>,
    metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> TollgateResult<Self> {
        config.validate()?;
        let backoff = config.build_backoff();
        Ok(Self {
            config,
            backoff,
            metrics: Arc::new(TracingMetrics),
        })
    }

    /// Replace the strategy built from the config
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, passing it the zero-based attempt number
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        options: RetryOptions<'_, E>,
        mut operation: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let name = options.operation;
        let mut last_delay = Duration::ZERO;
        let mut total_delay = Duration::ZERO;
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(operation = %name, attempt, "retry cancelled before attempt");
                return Err(RetryFailure::Cancelled(Cancelled));
            }

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        self.metrics.retry_succeeded(name, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if let Some(retry_if) = &options.retry_if {
                if !retry_if(&error) {
                    tracing::debug!(operation = %name, attempt, "error is not retryable");
                    return Err(RetryFailure::NotRetryable(error));
                }
            }

            if attempt + 1 >= max_attempts {
                self.metrics.retry_exhausted(name, max_attempts);
                return Err(RetryFailure::Exhausted(RetryError {
                    error,
                    attempts: max_attempts,
                    last_delay,
                    total_delay,
                }));
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            if let Some(on_retry) = &options.on_retry {
                on_retry(attempt, &error, delay);
            }
            drop(error);
            self.metrics.retry_attempt(name, attempt, delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(operation = %name, attempt, "retry cancelled during backoff");
                    return Err(RetryFailure::Cancelled(Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            last_delay = delay;
            total_delay = total_delay.saturating_add(delay);
            attempt += 1;
        }
    }

    /// [`RetryExecutor::execute`] for operations without a result value
    pub async fn run<E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        options: RetryOptions<'_, E>,
        operation: F,
    ) -> Result<(), RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.execute(cancel, options, operation).await
    }
}
