//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(about = "Serve tools over JSON-RPC on stdio behind rate limits, circuit breakers and retries")]
#[command(version)]
pub struct Cli {
    /// Configuration file (.yaml, .yml, .toml or .json)
    #[arg(long, short, global = true, env = "TOLLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity used for rate-limit keys
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Log level; RUST_LOG takes precedence
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Commands {
    /// Serve requests on stdin/stdout (default)
    #[default]
    Serve,
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// List the tools the configuration registers
    ListTools,
}

impl Cli {
    pub fn subcommand(&self) -> Commands {
        self.command.unwrap_or_default()
    }
}
