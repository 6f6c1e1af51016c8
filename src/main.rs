//! tunsentry - VPN disconnect watcher
//!
//! Tears an externally managed VPN down when the network that carries its
//! tunnel addresses disappears, for example after the user disconnects it
//! from the system network settings.

use clap::{Parser, Subcommand};
use tunsentry_core::{error::TunsentryError, init_logging};

mod cli;
mod daemon;

#[derive(Parser)]
#[command(name = "tunsentry", version)]
#[command(about = "Tear down a VPN when the network carrying its tunnel disappears")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for loss of the tunnel network and tear the VPN down
    Watch(cli::watch::WatchArgs),
    /// List NetworkManager networks and their addresses
    Networks {
        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration
    CheckConfig(cli::watch::ConfigArgs),
    /// Stop a detached watcher
    Stop,
}

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Watch(args) => cli::watch::run_watch(args),
        Commands::Networks { json } => cli::networks::run_networks(json),
        Commands::CheckConfig(args) => cli::check_config::run_check_config(args),
        Commands::Stop => cli::stop::run_stop(),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // Configuration errors (exit code 2)
                TunsentryError::Config(_)
                | TunsentryError::Toml(_)
                | TunsentryError::TomlSerialize(_) => 2,
                // Runtime errors (exit code 1)
                TunsentryError::Monitor(_)
                | TunsentryError::Teardown(_)
                | TunsentryError::Daemon { .. }
                | TunsentryError::Io(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
