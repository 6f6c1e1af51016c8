//! Check-config command

use tunsentry_core::error::TunsentryError;

use crate::cli::watch::{resolve_config, ConfigArgs};

/// Validate the effective configuration and print a summary
pub fn run_check_config(args: ConfigArgs) -> Result<(), TunsentryError> {
    let config = resolve_config(&args)?;

    println!("✓ Configuration is valid");
    println!("  Tunnel addresses: {}", config.tunnel_addresses());
    for action in config.teardown_actions() {
        println!("  On loss: {}", action);
    }
    Ok(())
}
