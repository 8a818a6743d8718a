use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use feedmail::store::FileStore;
use feedmail::{Config, Coordinator};

/// Poll feeds and email new items.
#[derive(Parser)]
#[command(name = "feedmail", version)]
struct Cli {
    /// Configuration file (`-` reads stdin).
    #[arg(short, long, env = "FEEDMAIL_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_default_config: bool,

    /// Create the storage directory and its marker file, then exit.
    #[arg(long)]
    init_storage: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_default_config {
        return match Config::default().to_toml() {
            Ok(toml) => {
                print!("{toml}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let loaded = if cli.init_storage {
        Config::load_storage_only(&cli.config)
    } else {
        Config::load_with_env(&cli.config)
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = feedmail::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedmail::logging::init_console_only(&config.logging.level);
    }

    if cli.init_storage {
        return match FileStore::init(&config.storage.path) {
            Ok(store) => {
                info!("Initialized storage at {}", store.root().display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to initialize storage: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let sources = match config.sources() {
        Ok(sources) => sources,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let coordinator = match Coordinator::from_config(&config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    coordinator.run(sources).await;
    ExitCode::SUCCESS
}
