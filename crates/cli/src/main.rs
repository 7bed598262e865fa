//! Upkeep CLI - talk to the maintenance backend from a terminal

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, debug, error};

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(about = "Command-line client for the Upkeep maintenance backend")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Configuration file (TOML)
    #[arg(short = 'c', long, global = true, env = "UPKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the persisted session
    #[arg(short = 'd', long, global = true)]
    state_dir: Option<PathBuf>,

    /// Timeout for the whole command in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "60")]
    timeout: u64,

    /// Log as newline-delimited JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.into(), cli.json_logs)?;

    let settings = config::load(cli.config.as_deref(), cli.state_dir)?;
    debug!(base_url = %settings.base_url, "configuration loaded");

    let outcome = if cli.timeout == 0 {
        cli.command.execute(&settings).await
    } else {
        let timeout_duration = Duration::from_secs(cli.timeout);
        match tokio::time::timeout(timeout_duration, cli.command.execute(&settings)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "command timed out after {} seconds",
                cli.timeout
            )),
        }
    };

    if let Err(e) = outcome {
        error!("Command failed: {e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
