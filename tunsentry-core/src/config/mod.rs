//! Configuration module
//!
//! Handles loading and saving the watcher configuration from TOML files.

use crate::monitor::teardown::TeardownAction;
use crate::monitor::tunnel::TunnelAddresses;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

pub mod toml_config;

/// Complete watcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Addresses assigned to the tunnel
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// What to do when the tunnel's network is lost
    #[serde(default)]
    pub teardown: TeardownConfig,
}

/// Tunnel address settings
///
/// Both may be left out and supplied on the command line instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// Teardown settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownConfig {
    /// PID file of the process owning the tunnel; it receives SIGTERM
    pub pid_file: Option<PathBuf>,

    /// Command to run, program first
    pub command: Option<Vec<String>>,
}

impl WatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.teardown.pid_file.is_none() && self.teardown.command.is_none() {
            return Err("At least one of teardown.pid_file or teardown.command is required".to_string());
        }

        if let Some(ref pid_file) = self.teardown.pid_file {
            if pid_file.as_os_str().is_empty() {
                return Err("teardown.pid_file cannot be empty".to_string());
            }
        }

        if let Some(ref command) = self.teardown.command {
            match command.first() {
                None => return Err("teardown.command cannot be empty".to_string()),
                Some(program) if program.trim().is_empty() => {
                    return Err("teardown.command program cannot be blank".to_string())
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Tunnel addresses as configured
    pub fn tunnel_addresses(&self) -> TunnelAddresses {
        TunnelAddresses {
            ipv4: self.tunnel.ipv4,
            ipv6: self.tunnel.ipv6,
        }
    }

    /// Teardown actions in the order they run
    pub fn teardown_actions(&self) -> Vec<TeardownAction> {
        let mut actions = Vec::new();
        if let Some(ref pid_file) = self.teardown.pid_file {
            actions.push(TeardownAction::SignalPidFile(pid_file.clone()));
        }
        if let Some(ref command) = self.teardown.command {
            actions.push(TeardownAction::Command(command.clone()));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_a_teardown_action() {
        let config = WatchConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_command() {
        let mut config = WatchConfig::default();
        config.teardown.command = Some(vec![]);
        assert!(config.validate().is_err());

        config.teardown.command = Some(vec!["  ".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_actions_follow_config_order() {
        let mut config = WatchConfig::default();
        config.teardown.pid_file = Some(PathBuf::from("/run/openconnect.pid"));
        config.teardown.command = Some(vec!["systemctl".to_string(), "stop".to_string()]);

        assert!(config.validate().is_ok());
        let actions = config.teardown_actions();
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], TeardownAction::SignalPidFile(_)));
        assert!(matches!(actions[1], TeardownAction::Command(_)));
    }
}
