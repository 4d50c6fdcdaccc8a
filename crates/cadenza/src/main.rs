// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cadenza - a transactional messaging campaign engine.
//!
//! Binary entry point: `serve` runs the full engine, `migrate` applies
//! database migrations and exits, `config` prints the resolved
//! configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod serve;

/// Cadenza - a transactional messaging campaign engine.
#[derive(Parser, Debug)]
#[command(name = "cadenza", version, about, long_about = None)]
struct Cli {
    /// Path to a config file (defaults to the XDG hierarchy).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Cadenza engine: gateway, orchestrator, and workers.
    Serve,
    /// Run database migrations and exit.
    Migrate,
    /// Print the resolved configuration.
    Config,
}

fn load_config(path: Option<&PathBuf>) -> cadenza_config::CadenzaConfig {
    let loaded = match path {
        Some(path) => cadenza_config::load_config_from_path(path),
        None => cadenza_config::load_config(),
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Migrate => {
            match cadenza_storage::Store::open(&config.store.dsn).await {
                Ok(store) => {
                    println!("migrations applied to {}", config.store.dsn);
                    store.close().await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Config => {
            match serde_json::to_string_pretty(&config) {
                Ok(rendered) => {
                    println!("{rendered}");
                    Ok(())
                }
                Err(e) => Err(cadenza_core::CadenzaError::Internal(e.to_string())),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
