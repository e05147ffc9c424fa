//! PyForge - managed standalone Python interpreters
//!
//! Main entry point: argument parsing, tracing setup and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pyforge_core::ForgeConfig;

mod instance_cli;
mod venv_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "pyforge",
    about = "Install standalone Python builds and manage their virtual environments",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON on stderr
    #[clap(long, global = true)]
    log_json: bool,

    /// Configuration file (defaults to $PYFORGE_CONFIG, then the platform config dir)
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Download and install a Python version
    Install {
        /// Version, e.g. 3.12 or 3.12.5
        version: String,

        /// Earliest acceptable build date (YYYY-MM-DD); newest release when omitted
        #[clap(long, value_parser = parse_date)]
        min_date: Option<NaiveDate>,
    },

    /// List installed Python versions
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show the installation matching a version
    Find {
        /// Version, e.g. 3.12 or 3.12.5
        version: String,

        /// Exact build date (YYYY-MM-DD)
        #[clap(long, value_parser = parse_date)]
        build_date: Option<NaiveDate>,

        /// Print only the interpreter path
        #[clap(long)]
        interpreter: bool,
    },

    /// Remove an installed Python version and its managed environments
    Remove {
        /// Version, e.g. 3.12 or 3.12.5
        version: String,

        /// Exact build date (YYYY-MM-DD)
        #[clap(long, value_parser = parse_date)]
        build_date: Option<NaiveDate>,
    },

    /// Manage virtual environments of an installed version
    Venv(venv_cli::VenvCommand),
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// Initialize tracing with CLI flags
///
/// Logs always go to stderr so command output on stdout stays parseable.
fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_env("PYFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            trigger.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.log_json);

    let config = ForgeConfig::load(cli.config.as_deref())?;
    tracing::debug!("Managed root: {:?}", config.root_dir);

    match cli.command {
        Command::Install { version, min_date } => {
            instance_cli::execute_install(&config, &version, min_date, cancel_on_ctrl_c()).await
        }
        Command::List { json } => instance_cli::execute_list(&config, json),
        Command::Find {
            version,
            build_date,
            interpreter,
        } => instance_cli::execute_find(&config, &version, build_date, interpreter),
        Command::Remove {
            version,
            build_date,
        } => instance_cli::execute_remove(&config, &version, build_date),
        Command::Venv(command) => command.execute(&config).await,
    }
}
