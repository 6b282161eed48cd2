//! Configuration model

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{TollgateError, TollgateResult};
use crate::pipeline::OperationPolicy;
use crate::recovery::rate_limiter::{RateLimitConfig, StoreSettings};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub store: StoreConfig,
    /// Policy for operations without an entry in `operations`
    pub defaults: OperationPolicy,
    pub operations: HashMap<String, OperationPolicy>,
    /// External command tools
    pub tools: Vec<CommandToolConfig>,
}

impl TollgateConfig {
    pub fn validate(&self) -> TollgateResult<()> {
        self.logging.validate()?;
        self.server.validate()?;
        self.rate_limit.validate()?;
        self.store.eviction.validate()?;
        self.defaults.validate()?;
        for (name, policy) in &self.operations {
            policy.validate().map_err(|e| {
                TollgateError::config(format!("operation '{}': {}", name, e))
            })?;
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            tool.validate()?;
            if !seen.insert(tool.name.as_str()) {
                return Err(TollgateError::config(format!(
                    "tool '{}' is defined more than once",
                    tool.name
                )));
            }
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TollgateError::config(format!(
                "invalid log format '{}': expected pretty, compact or json",
                other
            ))),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> TollgateResult<()> {
        if !LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(TollgateError::config(format!(
                "invalid log level '{}': expected one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported in the `initialize` handshake
    pub name: String,
    /// Identity used for rate-limit keys when the caller supplies none
    pub client_id: String,
    /// Requests processed concurrently before reading pauses
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight requests
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tollgate".to_string(),
            client_id: "local".to_string(),
            max_in_flight: 64,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> TollgateResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(TollgateError::config("server client_id must not be empty"));
        }
        if self.max_in_flight == 0 {
            return Err(TollgateError::config(
                "server max_in_flight must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Which counter store backs the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    /// Count nothing; every request is admitted
    Noop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(flatten)]
    pub eviction: StoreSettings,
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

/// An external program exposed as a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    /// Arguments; `{query}` is replaced by the call's `query` argument
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Output beyond this many bytes is truncated
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl CommandToolConfig {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            max_output_bytes: default_max_output_bytes(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> TollgateResult<()> {
        if self.name.trim().is_empty() {
            return Err(TollgateError::config("tool name must not be empty"));
        }
        if self.name.contains(':') {
            return Err(TollgateError::config(format!(
                "tool name '{}' must not contain ':'",
                self.name
            )));
        }
        if self.program.trim().is_empty() {
            return Err(TollgateError::config(format!(
                "tool '{}' has an empty program",
                self.name
            )));
        }
        if self.max_output_bytes == 0 {
            return Err(TollgateError::config(format!(
                "tool '{}' max_output_bytes must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}
