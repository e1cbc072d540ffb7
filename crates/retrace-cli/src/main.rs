mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retrace_config::{ConfigLoader, LogConfig};
use retrace_core::Direction;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "retrace",
    version,
    about = "Apply and revert SQL migrations, resuming where the last run stopped"
)]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ./retrace.yml when present.
    #[arg(short, long, global = true, env = "RETRACE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Apply pending migrations, up to and including --to
    Up {
        #[arg(long)]
        to: Option<String>,
    },
    /// Revert applied migrations, down to and including --to
    Down {
        #[arg(long)]
        to: Option<String>,
    },
    /// Show every migration and whether it is applied
    List,
    /// Create an empty migration file
    Create { title: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        ConfigLoader::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log);

    match cli.command {
        Command::Up { to } => commands::run(&config, Direction::Up, to).await,
        Command::Down { to } => commands::run(&config, Direction::Down, to).await,
        Command::List => commands::list(&config).await,
        Command::Create { title } => commands::create(&config, &title),
    }
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
