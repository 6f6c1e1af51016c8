//! Watch command
//!
//! Resolves the configuration, optionally detaches, and runs one tunnel
//! session against NetworkManager until the tunnel's network is lost.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use clap::Args;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use tunsentry_core::config::toml_config::{get_config_path, load_config_from_path};
use tunsentry_core::config::WatchConfig;
use tunsentry_core::error::{ConfigError, MonitorError, TunsentryError};
use tunsentry_core::monitor::nm::NetworkManagerSource;
use tunsentry_core::monitor::{SessionOutcome, TunnelHandle, TunnelSession};

use crate::daemon::process::{get_default_pid_file, DaemonProcess};

/// Options shared by commands that need a full watcher configuration
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Configuration file (defaults to ~/.config/tunsentry/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tunnel IPv4 address
    #[arg(long)]
    pub ipv4: Option<Ipv4Addr>,

    /// Tunnel IPv6 address
    #[arg(long)]
    pub ipv6: Option<Ipv6Addr>,

    /// PID file of the VPN process to signal on teardown
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Command to run on teardown
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Run in the background
    #[arg(long)]
    pub detach: bool,
}

/// Load the configuration file and apply command line overrides
///
/// A missing default configuration file is fine when the command line
/// supplies everything.
pub fn resolve_config(args: &ConfigArgs) -> Result<WatchConfig, TunsentryError> {
    let mut config = match args.config {
        Some(ref path) => load_config_from_path(path)?,
        None => {
            let path = get_config_path()?;
            if path.exists() {
                load_config_from_path(&path)?
            } else {
                WatchConfig::default()
            }
        }
    };

    if args.ipv4.is_some() {
        config.tunnel.ipv4 = args.ipv4;
    }
    if args.ipv6.is_some() {
        config.tunnel.ipv6 = args.ipv6;
    }
    if args.pid_file.is_some() {
        config.teardown.pid_file = args.pid_file.clone();
    }
    if !args.command.is_empty() {
        config.teardown.command = Some(args.command.clone());
    }

    config
        .validate()
        .map_err(|e| TunsentryError::Config(ConfigError::ValidationError { message: e }))?;

    if config.tunnel.ipv4.is_none() {
        return Err(ConfigError::MissingField {
            field: "tunnel.ipv4".to_string(),
        }
        .into());
    }
    if config.tunnel.ipv6.is_none() {
        return Err(ConfigError::MissingField {
            field: "tunnel.ipv6".to_string(),
        }
        .into());
    }

    Ok(config)
}

/// Run the watch command
pub fn run_watch(args: WatchArgs) -> Result<(), TunsentryError> {
    let config = resolve_config(&args.config)?;

    let daemon = if args.detach {
        let daemon = DaemonProcess::new(get_default_pid_file());
        if daemon.is_running()? {
            return Err(TunsentryError::Daemon {
                reason: "A watcher is already running; use `tunsentry stop` first".to_string(),
            });
        }
        println!("Detaching watcher");
        daemon.daemonize()?;
        Some(daemon)
    } else {
        None
    };

    // The runtime has to start after detaching
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(watch(config));

    if daemon.is_some() {
        let _ = std::fs::remove_file(get_default_pid_file());
    }
    result
}

async fn watch(config: WatchConfig) -> Result<(), TunsentryError> {
    let tunnel = TunnelHandle::with_addresses(config.tunnel_addresses(), config.teardown_actions());
    let source = NetworkManagerSource::new().await?;

    let session = TunnelSession::start(&source, tunnel.clone(), Some(tunnel.subscribe())).await?;
    info!("Watching for the network carrying {}", tunnel.addresses());
    println!("Watching for the network carrying {}", tunnel.addresses());

    match session.run_until(shutdown_signal()).await? {
        SessionOutcome::TornDown => {
            println!("✓ Tunnel network lost, teardown requested");
            Ok(())
        }
        SessionOutcome::Cancelled => {
            println!("Stopped watching");
            Ok(())
        }
        SessionOutcome::SourceClosed { matched } => {
            Err(MonitorError::DispatchFailed(match matched {
                Some(network) => format!("NetworkManager went away while tracking {}", network),
                None => "NetworkManager went away before the tunnel network was seen".to_string(),
            })
            .into())
        }
    }
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = terminate => info!("Terminated"),
    }
}
