//! Retry configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{TollgateError, TollgateResult};
use crate::recovery::backoff::{
    BackoffKind, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff, NoBackoff,
};

/// Configuration for retry behavior
///
/// `max_delay` of zero leaves delays uncapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor for exponential backoff
    pub multiplier: f64,
    /// Spread exponential delays by up to 25% either way
    pub jitter: bool,
    pub strategy: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            strategy: BackoffKind::Exponential,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            strategy: BackoffKind::None,
            ..Default::default()
        }
    }

    /// Create a config with limited retries
    pub fn limited(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a config for aggressive retrying
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> TollgateResult<()> {
        if self.max_attempts == 0 {
            return Err(TollgateError::config("retry max_attempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(TollgateError::config(format!(
                "retry multiplier must be a positive number, got {}",
                self.multiplier
            )));
        }
        if !self.max_delay.is_zero() && self.initial_delay > self.max_delay {
            return Err(TollgateError::config(format!(
                "retry initial_delay ({:?}) must not exceed max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Build the backoff strategy named by `strategy`
    pub fn build_backoff(&self) -> Arc<dyn BackoffStrategy> {
        match self.strategy {
            BackoffKind::None => Arc::new(NoBackoff),
            BackoffKind::Constant => Arc::new(ConstantBackoff::new(self.initial_delay)),
            BackoffKind::Linear => Arc::new(LinearBackoff::new(self.initial_delay, self.max_delay)),
            BackoffKind::Exponential => Arc::new(
                ExponentialBackoff::new(self.initial_delay, self.max_delay, self.multiplier)
                    .with_jitter(self.jitter),
            ),
        }
    }
}
