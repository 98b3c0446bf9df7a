use anyhow::{Context, Result};
use clap::Parser;
use hammer_config::{ConfigLoader, HammerConfig};
use hammer_logging::{init_logging_from_config, LogLevel};
use std::path::PathBuf;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<HammerConfig> {
    ConfigLoader::new().load(config_path).with_context(|| match config_path {
        Some(path) => format!("Failed to load configuration from {:?}", path),
        None => "Failed to load configuration from environment".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        commands::version();
        return Ok(());
    }

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    init_logging_from_config(&config.logging)?;

    match &cli.command {
        Commands::Run { plan } => commands::run::run_command(plan, &config.execution).await,
        Commands::Version => Ok(()),
    }
}
