//! Configuration
//!
//! Defaults, then a config file, then `TOLLGATE_*` environment variables.
//! The binary applies its command-line flags last.

mod loader;
mod model;

pub use loader::{
    ConfigLoader, ENV_CLIENT_ID, ENV_KEY_MODE, ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_RATE_LIMIT,
    ENV_RATE_LIMIT_ENABLED, ENV_RATE_WINDOW, load_from_file,
};
pub use model::{
    CommandToolConfig, LogFormat, LoggingConfig, ServerConfig, StoreBackend, StoreConfig,
    TollgateConfig,
};
