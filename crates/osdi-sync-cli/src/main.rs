use clap::{Parser, Subcommand};
use osdi_sync_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "osdi-sync", version, about = "Sync a local CRM with an OSDI remote")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every record changed since the last run
    Batch {
        #[command(subcommand)]
        action: commands::batch::BatchAction,
    },
    /// Sync a single record by id
    SyncOne(commands::record::SyncOneArgs),
    /// Reactive queue of local edits
    Queue {
        #[command(subcommand)]
        action: commands::queue::QueueAction,
    },
    /// Inspect or clear the process locks
    Lock {
        #[command(subcommand)]
        action: commands::lock::LockAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

/// `RUST_LOG` wins over `logging.filter`. Logs go to stderr.
fn init_logging(config: Option<&Config>) {
    let fallback = config.map_or("info", |c| c.logging.filter.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load();
    init_logging(config.as_ref().ok());

    let result: common::CliResult = match config {
        Ok(config) => match cli.command {
            Commands::Batch { action } => commands::batch::run(action, &config),
            Commands::SyncOne(args) => commands::record::run(args, &config),
            Commands::Queue { action } => commands::queue::run(action, &config),
            Commands::Lock { action } => commands::lock::run(action, &config),
            Commands::Config { action } => commands::config::run(action, config),
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
