//! Tollgate server binary
//!
//! Serves the configured tools as line-delimited JSON-RPC on stdin/stdout.
//! Every `tools/call` passes through the rate limiter, a per-tool circuit
//! breaker and the retry executor.
//!
//! ```bash
//! tollgate --config tollgate.yaml            # serve (default)
//! tollgate --config tollgate.yaml check-config
//! tollgate --config tollgate.yaml list-tools
//! ```

mod app;
mod args;
mod logging;
mod protocol;
mod server;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use app::App;
use args::{Cli, Commands};
use server::Server;
use tollgate_core::{ConfigLoader, TollgateConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let result = runtime.block_on(run(cli.subcommand(), config));
    // A blocking stdin read cannot be cancelled; do not wait for it
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Defaults, then file, then environment, then command-line flags
fn load_config(cli: &Cli) -> anyhow::Result<TollgateConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.with_env().load_unvalidated()?;

    if let Some(client_id) = &cli.client_id {
        config.server.client_id = client_id.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(command: Commands, config: TollgateConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve => serve(config).await,
        Commands::CheckConfig => {
            app::build_registry(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            eprintln!("configuration is valid");
            Ok(())
        }
        Commands::ListTools => {
            let registry = app::build_registry(&config)?;
            if registry.is_empty() {
                eprintln!("no tools configured");
            }
            for tool in registry.list() {
                println!("{}\t{}", tool.name, tool.description);
            }
            Ok(())
        }
    }
}

async fn serve(config: TollgateConfig) -> anyhow::Result<()> {
    let app = Arc::new(App::from_config(config)?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            signal.cancel();
        }
    });

    Server::new(app)
        .run(tokio::io::stdin(), tokio::io::stdout(), shutdown)
        .await?;
    Ok(())
}
