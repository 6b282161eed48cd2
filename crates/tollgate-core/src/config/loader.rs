//! Configuration loading from files and the environment

use std::fs;
use std::path::{Path, PathBuf};

use super::model::TollgateConfig;
use crate::error::{TollgateError, TollgateResult};

/// Environment variable names read by [`TollgateConfig::apply_env_overrides`]
pub const ENV_LOG_LEVEL: &str = "TOLLGATE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "TOLLGATE_LOG_FORMAT";
pub const ENV_RATE_LIMIT_ENABLED: &str = "TOLLGATE_RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT: &str = "TOLLGATE_RATE_LIMIT";
pub const ENV_RATE_WINDOW: &str = "TOLLGATE_RATE_WINDOW";
pub const ENV_KEY_MODE: &str = "TOLLGATE_KEY_MODE";
pub const ENV_CLIENT_ID: &str = "TOLLGATE_CLIENT_ID";

/// Load a configuration file.
///
/// The format follows the extension: `.toml`, `.yaml`/`.yml`, anything else is JSON.
pub fn load_from_file(path: &Path) -> TollgateResult<TollgateConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        TollgateError::config(format!(
            "failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let parsed = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(TollgateError::from),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(TollgateError::from),
        _ => serde_json::from_str(&content).map_err(TollgateError::from),
    };

    parsed.map_err(|e| {
        TollgateError::config(format!("failed to parse '{}': {}", path.display(), e))
    })
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> TollgateResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TollgateError::config(format!("invalid {} value '{}': {}", name, value, e)))
}

impl TollgateConfig {
    /// Apply `TOLLGATE_*` overrides found through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> TollgateResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level.trim().to_ascii_lowercase();
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = parse_env(ENV_LOG_FORMAT, &format)?;
        }
        if let Some(enabled) = lookup(ENV_RATE_LIMIT_ENABLED) {
            self.rate_limit.enabled = parse_env(ENV_RATE_LIMIT_ENABLED, &enabled)?;
        }
        if let Some(limit) = lookup(ENV_RATE_LIMIT) {
            self.rate_limit.limit = parse_env(ENV_RATE_LIMIT, &limit)?;
        }
        if let Some(window) = lookup(ENV_RATE_WINDOW) {
            self.rate_limit.window = humantime_serde::re::humantime::parse_duration(window.trim())
                .map_err(|e| {
                    TollgateError::config(format!(
                        "invalid {} value '{}': {}",
                        ENV_RATE_WINDOW, window, e
                    ))
                })?;
        }
        if let Some(mode) = lookup(ENV_KEY_MODE) {
            self.rate_limit.key_mode = parse_env(ENV_KEY_MODE, &mode)?;
        }
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.server.client_id = client_id;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File(PathBuf),
    Environment,
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

/// Layers configuration sources over the defaults, in the order they were added
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env: EnvLookup,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn with_env(mut self) -> Self {
        self.sources.push(ConfigSource::Environment);
        self
    }

    /// Read environment overrides through `lookup` instead of the process environment
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.env = Box::new(lookup);
        self
    }

    /// Load without validating, so callers can layer CLI flags first
    pub fn load_unvalidated(self) -> TollgateResult<TollgateConfig> {
        let mut config = TollgateConfig::default();
        for source in &self.sources {
            match source {
                ConfigSource::File(path) => {
                    tracing::debug!(path = %path.display(), "loading config file");
                    config = load_from_file(path)?;
                }
                ConfigSource::Environment => config.apply_env_overrides(&self.env)?,
            }
        }
        Ok(config)
    }

    pub fn load(self) -> TollgateResult<TollgateConfig> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
