//! Networks command
//!
//! Lists the networks NetworkManager currently reports, marking the one
//! that carries the configured tunnel addresses.

use std::net::IpAddr;

use colored::Colorize;

use tunsentry_core::config::toml_config::load_config;
use tunsentry_core::error::TunsentryError;
use tunsentry_core::monitor::nm::NetworkManagerSource;
use tunsentry_core::monitor::{NetworkSnapshot, TunnelAddresses};

/// Run the networks command
pub fn run_networks(json: bool) -> Result<(), TunsentryError> {
    let runtime = tokio::runtime::Runtime::new()?;
    let (networks, online) = runtime.block_on(async {
        let source = NetworkManagerSource::new().await?;
        let networks = source.snapshot().await?;
        let online = source.is_network_available().await?;
        Ok::<_, TunsentryError>((networks, online))
    })?;

    if json {
        let rendered = serde_json::to_string_pretty(&networks).map_err(std::io::Error::other)?;
        println!("{}", rendered);
        return Ok(());
    }

    // Marking is best effort; listing works without a configuration
    let tunnel = load_config()
        .map(|config| config.tunnel_addresses())
        .unwrap_or_default();

    let status = if online {
        "online".green()
    } else {
        "limited".yellow()
    };
    println!("Connectivity: {}", status);

    for network in &networks {
        print_network(network, &tunnel);
    }

    Ok(())
}

fn print_network(network: &NetworkSnapshot, tunnel: &TunnelAddresses) {
    let interface = network.properties.interface.as_deref().unwrap_or("?");
    let marker = if carries_tunnel(network, tunnel) {
        " [tunnel]".green().bold().to_string()
    } else {
        String::new()
    };

    println!("{} ({}){}", interface.bold(), network.network, marker);
    if network.properties.addresses.is_empty() {
        println!("    {}", "no addresses".dimmed());
    }
    for address in &network.properties.addresses {
        println!("    {}", address);
    }
}

fn carries_tunnel(network: &NetworkSnapshot, tunnel: &TunnelAddresses) -> bool {
    match (tunnel.ipv4, tunnel.ipv6) {
        (Some(v4), Some(v6)) => {
            network.properties.contains(IpAddr::V4(v4)) && network.properties.contains(IpAddr::V6(v6))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunsentry_core::monitor::LinkProperties;

    fn snapshot(addresses: &[&str]) -> NetworkSnapshot {
        NetworkSnapshot {
            network: "/org/freedesktop/NetworkManager/Devices/5".to_string(),
            properties: LinkProperties::new(addresses.iter().map(|a| a.parse().unwrap()).collect())
                .with_interface("tun0"),
        }
    }

    #[test]
    fn test_carries_tunnel_needs_both_families() {
        let tunnel = TunnelAddresses::new("10.0.0.2".parse().unwrap(), "fd00::2".parse().unwrap());

        assert!(carries_tunnel(&snapshot(&["10.0.0.2", "fd00::2"]), &tunnel));
        assert!(!carries_tunnel(&snapshot(&["10.0.0.2"]), &tunnel));
        assert!(!carries_tunnel(
            &snapshot(&["10.0.0.2", "fd00::2"]),
            &TunnelAddresses::default()
        ));
    }
}
