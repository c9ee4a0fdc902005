//! CLI for the AstroBox server.

mod commands;

use anyhow::Result;
use astrobox_core::{config, logging};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{run_config_path, run_history, run_serve};

/// Top-level CLI for AstroBox.
#[derive(Debug, Parser)]
#[command(name = "astrobox")]
#[command(about = "AstroBox: media download orchestration server", long_about = None)]
pub struct Cli {
    /// Config file to use instead of `~/.config/astrobox/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the state-dir log file.
    #[arg(long, global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the HTTP API and job engine until interrupted.
    Serve {
        /// Listen address, overriding the config (e.g. 0.0.0.0:3536).
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Print persisted job history.
    History {
        /// Only jobs with this status.
        #[arg(long)]
        status: Option<String>,
        /// Case-insensitive match on title or URL.
        #[arg(long, short = 'q')]
        query: Option<String>,
        /// Maximum rows to print.
        #[arg(long, default_value = "20", value_name = "N")]
        limit: usize,
    },

    /// Print the config file path.
    ConfigPath,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if cli.log_stderr || logging::init_logging(None).is_err() {
            logging::init_logging_stderr();
        }

        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => config::config_path()?,
        };

        match cli.command {
            CliCommand::ConfigPath => run_config_path(&config_path),
            CliCommand::Serve { listen } => {
                let cfg = config::load_or_init_at(&config_path)?;
                tracing::debug!("loaded config: {:?}", cfg);
                run_serve(cfg, listen).await
            }
            CliCommand::History {
                status,
                query,
                limit,
            } => {
                let cfg = config::load_or_init_at(&config_path)?;
                run_history(&cfg, status.as_deref(), query, limit)
            }
        }
    }
}

#[cfg(test)]
mod tests;
