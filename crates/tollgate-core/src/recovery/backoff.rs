//! Backoff strategies for retry operations
//!
//! Every strategy is a pure function of the zero-indexed attempt number, so a
//! single instance can be shared by any number of concurrent retry loops.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TollgateError;

/// Fraction of the base delay used as the jitter range, in both directions
pub const JITTER_RATIO: f64 = 0.25;

/// Backoff strategy trait
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    /// Get the delay to wait after the given attempt failed (0-indexed)
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// Named backoff strategy, as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    None,
    Constant,
    Linear,
    #[default]
    Exponential,
}

impl BackoffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Constant => "constant",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
        }
    }
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackoffKind {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(TollgateError::config(format!(
                "invalid backoff strategy '{}': expected one of none, constant, linear, exponential",
                other
            ))),
        }
    }
}

/// Clamp a delay expressed in nanoseconds to `max` (zero means uncapped)
fn capped(nanos: f64, max: Duration) -> Duration {
    let max_nanos = if max.is_zero() {
        f64::INFINITY
    } else {
        max.as_nanos() as f64
    };
    let nanos = nanos.min(max_nanos);
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return if max.is_zero() { Duration::MAX } else { max };
    }
    Duration::from_nanos(nanos.max(0.0).round() as u64)
}

/// No delay between attempts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffStrategy for NoBackoff {
    fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Constant backoff - same delay for all attempts
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for ConstantBackoff {
    fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Linear backoff - `initial * attempt`, capped at `max`
///
/// The first retry (after attempt 0) is immediate.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    initial_delay: Duration,
    max_delay: Duration,
}

impl LinearBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        capped(
            self.initial_delay.as_nanos() as f64 * f64::from(attempt),
            self.max_delay,
        )
    }
}

/// Exponential backoff with optional ±25% jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter: false,
        }
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before jitter is applied
    pub fn base_delay(&self, attempt: u32) -> Duration {
        capped(
            self.initial_delay.as_nanos() as f64 * self.multiplier.powf(f64::from(attempt)),
            self.max_delay,
        )
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let offset = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        let jittered = delay.as_nanos() as f64 * (1.0 + offset);

        capped(jittered, Duration::ZERO)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.add_jitter(self.base_delay(attempt))
    }
}
