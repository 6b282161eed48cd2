//! Type definitions for rate limiting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::error::{TollgateError, TollgateResult};

/// How rate-limit keys are composed from a tool name and client identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    /// One counter per (tool, client)
    #[default]
    PerTool,
    /// One counter per client across every tool
    Global,
    /// One counter per client address
    IpBased,
    /// The client id is used verbatim as the key material
    Custom,
}

impl KeyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerTool => "per-tool",
            Self::Global => "global",
            Self::IpBased => "ip-based",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyMode {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-tool" | "per_tool" => Ok(Self::PerTool),
            "global" => Ok(Self::Global),
            "ip-based" | "ip_based" | "ip" => Ok(Self::IpBased),
            "custom" => Ok(Self::Custom),
            other => Err(TollgateError::config(format!(
                "invalid rate limit key mode '{}': expected one of per-tool, global, ip-based, custom",
                other
            ))),
        }
    }
}

/// Configured algorithm label.
///
/// Counting is always a fixed window; the label is kept for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    #[default]
    FixedWindow,
    TokenBucket,
}

/// Per-tool override of the global limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRateLimit {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl ToolRateLimit {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            enabled: true,
            limit,
            window,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled at all
    pub enabled: bool,
    /// Maximum requests per window
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub key_mode: KeyMode,
    pub key_prefix: String,
    pub algorithm: RateLimitAlgorithm,
    /// Overrides keyed by tool name
    pub tools: HashMap<String, ToolRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window: Duration::from_secs(60),
            key_mode: KeyMode::PerTool,
            key_prefix: "tollgate".to_string(),
            algorithm: RateLimitAlgorithm::FixedWindow,
            tools: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            ..Default::default()
        }
    }

    /// Create a disabled rate limit config
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_key_mode(mut self, mode: KeyMode) -> Self {
        self.key_mode = mode;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Add or replace a per-tool override
    pub fn with_tool(mut self, tool: impl Into<String>, limit: ToolRateLimit) -> Self {
        self.tools.insert(tool.into(), limit);
        self
    }

    /// Effective `(limit, window)` for a tool, falling back to the global values
    pub fn limits_for(&self, tool: Option<&str>) -> (u64, Duration) {
        tool.and_then(|name| self.tools.get(name))
            .filter(|t| t.enabled)
            .map(|t| (t.limit, t.window))
            .unwrap_or((self.limit, self.window))
    }

    pub fn validate(&self) -> TollgateResult<()> {
        if self.limit == 0 {
            return Err(TollgateError::config("rate limit must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(TollgateError::config(
                "rate limit window must be greater than 0",
            ));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(TollgateError::config("rate limit key prefix must not be empty"));
        }
        if self.key_prefix.contains(':') {
            return Err(TollgateError::config(format!(
                "rate limit key prefix '{}' must not contain ':'",
                self.key_prefix
            )));
        }
        for (tool, limit) in &self.tools {
            if tool.trim().is_empty() {
                return Err(TollgateError::config("rate limit override has an empty tool name"));
            }
            if !limit.enabled {
                continue;
            }
            if limit.limit == 0 {
                return Err(TollgateError::config(format!(
                    "rate limit for tool '{}' must be greater than 0",
                    tool
                )));
            }
            if limit.window.is_zero() {
                return Err(TollgateError::config(format!(
                    "rate limit window for tool '{}' must be greater than 0",
                    tool
                )));
            }
        }
        Ok(())
    }
}

/// The counter store failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store has been shut down")]
    Closed,

    #[error("counter store error: {0}")]
    Backend(String),
}

impl From<StoreError> for TollgateError {
    fn from(error: StoreError) -> Self {
        TollgateError::store(error.to_string())
    }
}

/// A request was refused by the rate limiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for '{key}': {limit} requests per {window:?}, retry after {retry_after:?}")]
pub struct RateLimitError {
    pub key: String,
    pub limit: u64,
    pub window: Duration,
    pub retry_after: Duration,
}

/// Read-only view of one key's counter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub key: String,
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub current: u64,
    pub remaining: u64,
    /// Whether one more request would currently be admitted
    pub allowed: bool,
    pub reset_time: DateTime<Utc>,
}
